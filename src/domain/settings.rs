use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::Subscription;

/// When periodic updates are allowed to use the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateConfig {
    #[default]
    WifiOnly,
    Always,
}

impl UpdateConfig {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wifi" | "wifi_only" | "wifi-only" => Some(UpdateConfig::WifiOnly),
            "always" => Some(UpdateConfig::Always),
            _ => None,
        }
    }
}

/// Desired state as edited by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub adblock_enabled: bool,
    pub acceptable_ads_enabled: bool,
    pub update_config: UpdateConfig,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub active_primary_subscriptions: Vec<Subscription>,
    pub active_other_subscriptions: Vec<Subscription>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adblock_enabled: true,
            acceptable_ads_enabled: true,
            update_config: UpdateConfig::default(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            active_primary_subscriptions: Vec::new(),
            active_other_subscriptions: Vec::new(),
        }
    }
}

impl Settings {
    /// True when `other` would produce a different consolidated file.
    ///
    /// Subscription lists are compared as URL sets, so reordering or a refreshed
    /// `last_update` does not count as a change.
    pub fn content_changed(&self, other: &Settings) -> bool {
        self.adblock_enabled != other.adblock_enabled
            || self.acceptable_ads_enabled != other.acceptable_ads_enabled
            || self.allowed_domains != other.allowed_domains
            || self.blocked_domains != other.blocked_domains
            || urls_differ(
                &self.active_primary_subscriptions,
                &other.active_primary_subscriptions,
            )
            || urls_differ(
                &self.active_other_subscriptions,
                &other.active_other_subscriptions,
            )
    }

    pub fn update_config_changed(&self, other: &Settings) -> bool {
        self.update_config != other.update_config
    }

    pub fn active_urls(&self) -> impl Iterator<Item = &str> {
        self.active_primary_subscriptions
            .iter()
            .chain(self.active_other_subscriptions.iter())
            .map(|s| s.url.as_str())
    }

    pub fn to_saved_state(&self) -> SavedState {
        SavedState {
            acceptable_ads_enabled: self.acceptable_ads_enabled,
            allowed_domains: self.allowed_domains.clone(),
            blocked_domains: self.blocked_domains.clone(),
            primary_subscriptions: self
                .active_primary_subscriptions
                .iter()
                .map(|s| s.url.clone())
                .collect(),
            other_subscriptions: self
                .active_other_subscriptions
                .iter()
                .map(|s| s.url.clone())
                .collect(),
        }
    }
}

fn urls_differ(a: &[Subscription], b: &[Subscription]) -> bool {
    let a: HashSet<&str> = a.iter().map(|s| s.url.as_str()).collect();
    let b: HashSet<&str> = b.iter().map(|s| s.url.as_str()).collect();
    a != b
}

/// Snapshot of the settings that produced the current consolidated file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedState {
    pub acceptable_ads_enabled: bool,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub primary_subscriptions: Vec<String>,
    pub other_subscriptions: Vec<String>,
}

impl SavedState {
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.primary_subscriptions
            .iter()
            .chain(self.other_subscriptions.iter())
            .map(String::as_str)
    }
}
