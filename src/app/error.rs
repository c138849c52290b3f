use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<crate::config::ConfigError> for SyncError {
    fn from(e: crate::config::ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}

impl From<tempfile::PersistError> for SyncError {
    fn from(e: tempfile::PersistError) -> Self {
        SyncError::Io(e.error)
    }
}

impl From<tempfile::PathPersistError> for SyncError {
    fn from(e: tempfile::PathPersistError) -> Self {
        SyncError::Io(e.error)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
