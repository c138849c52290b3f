use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Download counts at or above this value are reported as `"4+"`.
pub const DOWNLOAD_COUNT_CAP: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    /// Built-in list shipped with the application.
    #[default]
    Default,
    /// Custom list added by URL.
    FromUrl,
    /// Custom list read from a local file.
    FromFile,
}

/// A filter list the user has opted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub kind: SubscriptionType,
    /// Set when a local-file subscription could not be read during the last merge.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_error: bool,
}

impl Subscription {
    pub fn new(url: impl Into<String>, title: impl Into<String>, kind: SubscriptionType) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            last_update: None,
            kind,
            has_error: false,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub fn is_local_file(&self) -> bool {
        self.kind == SubscriptionType::FromFile
    }

    /// Local path of a `FromFile` subscription, accepting `file://` URLs.
    pub fn local_path(&self) -> PathBuf {
        match url::Url::parse(&self.url) {
            Ok(parsed) if parsed.scheme() == "file" => parsed
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(&self.url)),
            _ => PathBuf::from(&self.url),
        }
    }
}

/// Cache record for one downloaded subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedSubscription {
    pub url: String,
    pub path: PathBuf,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub download_count: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "0".to_string()
}

impl DownloadedSubscription {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            version: default_version(),
            etag: String::new(),
            last_modified: String::new(),
            download_count: 0,
            last_updated: None,
        }
    }

    pub fn exists(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.path.is_file()
    }

    /// Returns the record only while its backing file is still on disk.
    pub fn if_exists(self) -> Option<Self> {
        if self.exists() {
            Some(self)
        } else {
            None
        }
    }

    pub fn download_count_param(&self) -> String {
        saturating_count(self.download_count)
    }
}

/// Formats a counter the way the servers expect it: `0`..`3`, then `4+`.
pub fn saturating_count(count: u32) -> String {
    if count < DOWNLOAD_COUNT_CAP {
        count.to_string()
    } else {
        format!("{}+", DOWNLOAD_COUNT_CAP)
    }
}
