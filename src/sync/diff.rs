use std::collections::HashSet;

use crate::domain::{SavedState, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    AcceptableAdsChanged,
    AllowedDomainsChanged,
    BlockedDomainsChanged,
    SubscriptionsAdded,
    SubscriptionsRemoved,
}

/// Content difference between the desired settings and the last synced state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub kinds: Vec<ChangeKind>,
    /// Desired URLs missing from the saved state, in settings order.
    pub added: Vec<String>,
    /// Saved URLs no longer desired, in saved order.
    pub removed: Vec<String>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Update cadence is deliberately absent: it only affects scheduling.
pub fn diff(desired: &Settings, saved: &SavedState) -> Changes {
    let mut changes = Changes::default();

    if desired.acceptable_ads_enabled != saved.acceptable_ads_enabled {
        changes.kinds.push(ChangeKind::AcceptableAdsChanged);
    }
    if desired.allowed_domains != saved.allowed_domains {
        changes.kinds.push(ChangeKind::AllowedDomainsChanged);
    }
    if desired.blocked_domains != saved.blocked_domains {
        changes.kinds.push(ChangeKind::BlockedDomainsChanged);
    }

    let desired_urls: HashSet<&str> = desired.active_urls().collect();
    let saved_urls: HashSet<&str> = saved.urls().collect();

    let mut seen = HashSet::new();
    changes.added = desired
        .active_urls()
        .filter(|url| !saved_urls.contains(url) && seen.insert(*url))
        .map(str::to_string)
        .collect();
    changes.removed = saved
        .urls()
        .filter(|url| !desired_urls.contains(url) && seen.insert(*url))
        .map(str::to_string)
        .collect();

    if !changes.added.is_empty() {
        changes.kinds.push(ChangeKind::SubscriptionsAdded);
    }
    if !changes.removed.is_empty() {
        changes.kinds.push(ChangeKind::SubscriptionsRemoved);
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Subscription, SubscriptionType, UpdateConfig};

    fn sub(url: &str) -> Subscription {
        Subscription::new(url, "", SubscriptionType::FromUrl)
    }

    fn synced() -> (Settings, SavedState) {
        let settings = Settings {
            allowed_domains: vec!["good.example".into()],
            active_primary_subscriptions: vec![sub("https://lists.test/a.txt")],
            active_other_subscriptions: vec![sub("https://lists.test/b.txt")],
            ..Settings::default()
        };
        let saved = settings.to_saved_state();
        (settings, saved)
    }

    #[test]
    fn test_synced_state_has_no_changes() {
        let (settings, saved) = synced();
        assert!(diff(&settings, &saved).is_empty());
    }

    #[test]
    fn test_acceptable_ads_toggle_only() {
        let (mut settings, saved) = synced();
        settings.acceptable_ads_enabled = false;

        let changes = diff(&settings, &saved);

        assert_eq!(changes.kinds, vec![ChangeKind::AcceptableAdsChanged]);
    }

    #[test]
    fn test_added_primary_url_is_only_an_addition() {
        let (mut settings, saved) = synced();
        settings
            .active_primary_subscriptions
            .push(sub("https://lists.test/c.txt"));

        let changes = diff(&settings, &saved);

        assert_eq!(changes.kinds, vec![ChangeKind::SubscriptionsAdded]);
        assert_eq!(changes.added, vec!["https://lists.test/c.txt"]);
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_removed_and_domains_changed() {
        let (mut settings, saved) = synced();
        settings.active_other_subscriptions.clear();
        settings.blocked_domains.push("bad.example".into());
        settings.allowed_domains.clear();

        let changes = diff(&settings, &saved);

        assert!(changes.contains(ChangeKind::SubscriptionsRemoved));
        assert!(changes.contains(ChangeKind::AllowedDomainsChanged));
        assert!(changes.contains(ChangeKind::BlockedDomainsChanged));
        assert!(!changes.contains(ChangeKind::SubscriptionsAdded));
        assert_eq!(changes.removed, vec!["https://lists.test/b.txt"]);
    }

    #[test]
    fn test_moving_url_between_lists_is_not_a_change() {
        let (mut settings, saved) = synced();
        let moved = settings.active_other_subscriptions.remove(0);
        settings.active_primary_subscriptions.push(moved);

        assert!(diff(&settings, &saved).is_empty());
    }

    #[test]
    fn test_cadence_is_not_content() {
        let (mut settings, saved) = synced();
        settings.update_config = UpdateConfig::Always;

        assert!(diff(&settings, &saved).is_empty());
    }
}
