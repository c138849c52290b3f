use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DownloadedSubscription, SavedState};

/// Root persisted aggregate of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreData {
    /// Flipped once after the first scheduling pass, never reset.
    pub configured: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub saved_state: SavedState,
    pub downloaded_subscriptions: Vec<DownloadedSubscription>,
    /// `yyyyMMddHHmm` token derived from the counting server's `Date` header, 0 if never.
    pub last_user_counting_response: i64,
    pub user_counting_count: u32,
    /// Current consolidated file; stored apart from the record.
    #[serde(skip)]
    pub subscriptions_path: Option<PathBuf>,
}

impl CoreData {
    pub fn downloaded(&self, url: &str) -> Option<&DownloadedSubscription> {
        self.downloaded_subscriptions.iter().find(|d| d.url == url)
    }

    /// Inserts or replaces the record with the same URL.
    pub fn upsert_downloaded(&mut self, record: DownloadedSubscription) {
        match self
            .downloaded_subscriptions
            .iter_mut()
            .find(|d| d.url == record.url)
        {
            Some(existing) => *existing = record,
            None => self.downloaded_subscriptions.push(record),
        }
    }

    /// Removes records whose URL is not in `active`, returning them.
    pub fn retain_downloaded<'a, I>(&mut self, active: I) -> Vec<DownloadedSubscription>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let active: std::collections::HashSet<&str> = active.into_iter().collect();
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.downloaded_subscriptions)
            .into_iter()
            .partition(|d| active.contains(d.url.as_str()));
        self.downloaded_subscriptions = kept;
        removed
    }
}
