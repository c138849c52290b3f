//! User-editable desired state, observed by the scheduler.
pub mod file;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::app::Result;
use crate::domain::{Settings, Subscription, UpdateConfig};

pub use file::FileSettings;

/// Source of the desired [`Settings`].
///
/// Every `update` republishes the resulting value to subscribers, even when it is
/// equal to the previous one; observers are expected to compare.
pub trait SettingsRepository: Send + Sync {
    fn current(&self) -> Settings;
    fn subscribe(&self) -> watch::Receiver<Settings>;
    fn update(&self, mutate: &mut dyn FnMut(&mut Settings)) -> Result<Settings>;

    fn set_active_primary_subscriptions(&self, subscriptions: Vec<Subscription>) -> Result<Settings> {
        let mut subscriptions = Some(subscriptions);
        self.update(&mut |s| {
            if let Some(list) = subscriptions.take() {
                s.active_primary_subscriptions = list;
            }
        })
    }

    fn set_active_other_subscriptions(&self, subscriptions: Vec<Subscription>) -> Result<Settings> {
        let mut subscriptions = Some(subscriptions);
        self.update(&mut |s| {
            if let Some(list) = subscriptions.take() {
                s.active_other_subscriptions = list;
            }
        })
    }

    fn set_allowed_domains(&self, domains: Vec<String>) -> Result<Settings> {
        self.update(&mut |s| s.allowed_domains = domains.clone())
    }

    fn set_blocked_domains(&self, domains: Vec<String>) -> Result<Settings> {
        self.update(&mut |s| s.blocked_domains = domains.clone())
    }

    fn set_acceptable_ads_enabled(&self, enabled: bool) -> Result<Settings> {
        self.update(&mut |s| s.acceptable_ads_enabled = enabled)
    }

    fn set_update_config(&self, config: UpdateConfig) -> Result<Settings> {
        self.update(&mut |s| s.update_config = config)
    }

    /// Writes sync outcomes back onto the active subscriptions. URLs missing from
    /// `last_updates` keep their previous timestamp.
    fn update_subscription_status(
        &self,
        last_updates: &[(String, DateTime<Utc>)],
        errored: &[String],
    ) -> Result<Settings> {
        self.update(&mut |s| {
            for subscription in s
                .active_primary_subscriptions
                .iter_mut()
                .chain(s.active_other_subscriptions.iter_mut())
            {
                if let Some((_, at)) = last_updates.iter().find(|(url, _)| *url == subscription.url) {
                    subscription.last_update = Some(*at);
                }
                if subscription.is_local_file() {
                    subscription.has_error = errored.contains(&subscription.url);
                }
            }
        })
    }
}
