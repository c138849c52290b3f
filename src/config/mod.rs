//! Configuration management for filtersync.
//!
//! Configuration is read from `~/.config/filtersync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

pub mod interval;

pub use interval::{format_interval, parse_interval};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{AppInfo, Subscription, SubscriptionType};
use crate::fetcher::{RefreshPolicy, RetryPolicy};
use crate::ports::NetworkState;
use crate::sync::{BuiltinLists, SchedulerConfig};
use crate::telemetry::TelemetrySchedule;

pub const EASYLIST_URL: &str = "https://easylist-downloads.adblockplus.org/easylist.txt";
pub const ACCEPTABLE_ADS_URL: &str =
    "https://easylist-downloads.adblockplus.org/exceptionrules.txt";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppInfo,
    pub subscriptions: SubscriptionsConfig,
    pub sync: SyncConfig,
    pub telemetry: TelemetryConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    pub default_url: String,
    pub default_title: String,
    pub acceptable_ads_url: String,
    pub acceptable_ads_title: String,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            default_url: EASYLIST_URL.to_string(),
            default_title: "EasyList".to_string(),
            acceptable_ads_url: ACCEPTABLE_ADS_URL.to_string(),
            acceptable_ads_title: "Acceptable Ads".to_string(),
        }
    }
}

impl SubscriptionsConfig {
    pub fn builtin_lists(&self) -> BuiltinLists {
        BuiltinLists {
            default: Subscription::new(
                self.default_url.clone(),
                self.default_title.clone(),
                SubscriptionType::Default,
            ),
            acceptable_ads: Subscription::new(
                self.acceptable_ads_url.clone(),
                self.acceptable_ads_title.clone(),
                SubscriptionType::Default,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(deserialize_with = "interval::deserialize")]
    pub periodic_interval: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub flex: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub initial_delay: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub backoff: Duration,
    pub max_attempts: u32,
    #[serde(deserialize_with = "interval::deserialize")]
    pub debounce: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub http_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(deserialize_with = "interval::deserialize")]
    pub retry_initial_delay: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub retry_max_delay: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub refresh_new_subscription: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub refresh_metered: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub refresh_unmetered: Duration,
    /// Network state assumed when evaluating periodic constraints.
    pub network: NetworkState,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        let retry = RetryPolicy::default();
        let refresh = RefreshPolicy::default();
        Self {
            periodic_interval: scheduler.periodic_interval,
            flex: scheduler.flex,
            initial_delay: scheduler.initial_delay,
            backoff: scheduler.backoff,
            max_attempts: 4,
            debounce: scheduler.debounce,
            http_timeout: Duration::from_secs(30),
            retry_attempts: retry.attempts,
            retry_initial_delay: retry.initial_delay,
            retry_max_delay: retry.max_delay,
            refresh_new_subscription: refresh.new_subscription,
            refresh_metered: refresh.metered,
            refresh_unmetered: refresh.unmetered,
            network: NetworkState::default(),
        }
    }
}

impl SyncConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            periodic_interval: self.periodic_interval,
            flex: self.flex.min(self.periodic_interval),
            initial_delay: self.initial_delay,
            backoff: self.backoff,
            debounce: self.debounce,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            ..RetryPolicy::default()
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            new_subscription: self.refresh_new_subscription,
            metered: self.refresh_metered,
            unmetered: self.refresh_unmetered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Counting endpoint; the Acceptable Ads list URL unless overridden.
    pub endpoint: Option<String>,
    #[serde(deserialize_with = "interval::deserialize")]
    pub interval: Duration,
    #[serde(deserialize_with = "interval::deserialize")]
    pub backoff: Duration,
    pub max_attempts: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let schedule = TelemetrySchedule::default();
        Self {
            enabled: true,
            endpoint: None,
            interval: schedule.interval,
            backoff: schedule.backoff,
            max_attempts: schedule.max_attempts,
        }
    }
}

impl TelemetryConfig {
    pub fn schedule(&self) -> TelemetrySchedule {
        TelemetrySchedule {
            interval: self.interval,
            backoff: self.backoff,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/filtersync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("filtersync").join("config.toml"))
    }

    /// `[paths] data_dir`, or `<data dir>/filtersync`.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.paths.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("filtersync"))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    pub fn telemetry_endpoint(&self) -> &str {
        self.telemetry
            .endpoint
            .as_deref()
            .unwrap_or(&self.subscriptions.acceptable_ads_url)
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# filtersync configuration
#
# Intervals accept "500ms", "90s", "30m", "6h" or "1d".

[app]
# Identification appended to every download and counting request
addon_name = "filtersync"
application = ""
application_version = "0"
platform = "android"
platform_version = "0"

[subscriptions]
default_url = "https://easylist-downloads.adblockplus.org/easylist.txt"
default_title = "EasyList"
acceptable_ads_url = "https://easylist-downloads.adblockplus.org/exceptionrules.txt"
acceptable_ads_title = "Acceptable Ads"

[sync]
periodic_interval = "6h"
flex = "30m"
initial_delay = "6h"

# Backoff after a failed pass, doubled on every retry
backoff = "1m"
max_attempts = 4

# Quiet period after a settings edit before a sync is scheduled
debounce = "500ms"

# Per-request HTTP bounds
http_timeout = "30s"
retry_attempts = 3
retry_initial_delay = "200ms"
retry_max_delay = "2s"

# Cached lists are reused by periodic passes until they are this old
refresh_new_subscription = "1h"
refresh_metered = "3d"
refresh_unmetered = "24h"

# unmetered, metered or disconnected
network = "unmetered"

[telemetry]
enabled = true
# endpoint = "https://easylist-downloads.adblockplus.org/exceptionrules.txt"
interval = "12h"
backoff = "2m"
max_attempts = 8

[paths]
# data_dir = "/var/lib/filtersync"

[logging]
# Overridden by RUST_LOG
level = "info"
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.telemetry, TelemetryConfig::default());
        assert_eq!(config.subscriptions, SubscriptionsConfig::default());
        assert_eq!(config.app.platform, "android");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[sync]
periodic_interval = "1d"
network = "metered"
refresh_metered = "2d"
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.sync.periodic_interval, Duration::from_secs(86400));
        assert_eq!(config.sync.network, NetworkState::Metered);
        assert_eq!(config.sync.flex, Duration::from_secs(30 * 60));
        assert_eq!(config.sync.refresh_policy().metered, Duration::from_secs(2 * 86400));
        assert_eq!(config.sync.refresh_unmetered, Duration::from_secs(86400));
        assert_eq!(config.telemetry_endpoint(), ACCEPTABLE_ADS_URL);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");

        assert_eq!(config.sync.scheduler(), SchedulerConfig::default());
        assert_eq!(config.sync.retry_policy(), RetryPolicy::default());
        assert_eq!(config.sync.refresh_policy(), RefreshPolicy::default());
        assert_eq!(config.subscriptions.builtin_lists().default.url, EASYLIST_URL);
    }

    #[test]
    fn test_bad_interval_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\nbackoff = \"soon\"\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
