use serde::Serialize;

/// Sync progress as seen by observers. Only the latest value is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// Number of subscriptions processed so far in the running pass.
    Downloading(usize),
    Success,
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Downloading(n) => write!(f, "downloading ({} done)", n),
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}
