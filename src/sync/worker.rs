use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{Result, SyncError};
use crate::domain::{DownloadedSubscription, Settings, Subscription, SyncStatus};
use crate::fetcher::{DownloadMode, DownloadResult, Downloader};
use crate::filters::{CustomRules, Merger};
use crate::ports::{Analytics, AnalyticsEvent, Clock};
use crate::settings::SettingsRepository;
use crate::store::CoreStore;
use crate::sync::diff::{diff, ChangeKind};
use crate::sync::work::{Trigger, WorkResult};

/// Lists the engine knows about regardless of user selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinLists {
    pub default: Subscription,
    pub acceptable_ads: Subscription,
}

/// Everything one pass syncs, in download order: the default list unless already
/// selected, primary, other, then Acceptable Ads when enabled. First URL wins.
pub fn active_subscriptions(settings: &Settings, lists: &BuiltinLists) -> Vec<Subscription> {
    let has_default = settings
        .active_primary_subscriptions
        .iter()
        .any(|s| s.url == lists.default.url);

    let default = (!has_default).then_some(&lists.default);
    let acceptable_ads = settings
        .acceptable_ads_enabled
        .then_some(&lists.acceptable_ads);

    let mut seen = HashSet::new();
    default
        .into_iter()
        .chain(settings.active_primary_subscriptions.iter())
        .chain(settings.active_other_subscriptions.iter())
        .chain(acceptable_ads)
        .filter(|s| seen.insert(s.url.clone()))
        .cloned()
        .collect()
}

/// Executes sync passes: diff, download every active list, merge, persist.
pub struct SyncWorker {
    store: Arc<dyn CoreStore>,
    settings: Arc<dyn SettingsRepository>,
    downloader: Arc<dyn Downloader>,
    merger: Arc<Merger>,
    clock: Arc<dyn Clock>,
    analytics: Arc<dyn Analytics>,
    status: Arc<watch::Sender<SyncStatus>>,
    lists: BuiltinLists,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoreStore>,
        settings: Arc<dyn SettingsRepository>,
        downloader: Arc<dyn Downloader>,
        merger: Arc<Merger>,
        clock: Arc<dyn Clock>,
        analytics: Arc<dyn Analytics>,
        status: Arc<watch::Sender<SyncStatus>>,
        lists: BuiltinLists,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            settings,
            downloader,
            merger,
            clock,
            analytics,
            status,
            lists,
            max_attempts,
            cancel,
        }
    }

    pub fn downloader(&self) -> &Arc<dyn Downloader> {
        &self.downloader
    }

    fn publish(&self, status: SyncStatus) {
        debug!("Sync status: {}", status);
        self.status.send_replace(status);
    }

    /// Runs one pass. Cancellation counts as success so shutdown never queues retries.
    pub async fn run(&self, trigger: Trigger, attempt: u32) -> WorkResult {
        debug!("Sync pass {:?}, attempt {}", trigger, attempt);
        if attempt > self.max_attempts {
            warn!("Max attempts reached ({}), giving up", self.max_attempts);
            self.publish(SyncStatus::Failed);
            return WorkResult::Failure;
        }

        match self.try_run(trigger, attempt).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                info!("Sync pass cancelled");
                WorkResult::Success
            }
            Err(e) => {
                error!("Failed subscriptions updates, retrying shortly: {}", e);
                self.analytics.log_exception(&e);
                self.analytics.log_event(AnalyticsEvent::SyncFailed);
                self.publish(SyncStatus::Failed);
                WorkResult::Retry
            }
        }
    }

    async fn try_run(&self, trigger: Trigger, attempt: u32) -> Result<WorkResult> {
        let settings = self.settings.current();
        let data = self.store.get()?;
        let changes = diff(&settings, &data.saved_state);
        debug!("Diff: {:?}", changes);

        // Forced, periodic and retried passes always run
        if changes.is_empty() && !trigger.is_forced() && !trigger.is_periodic() && attempt == 0 {
            debug!("No changes from last update");
            return Ok(WorkResult::Success);
        }

        let active = active_subscriptions(&settings, &self.lists);
        let mut new_urls = changes.added.clone();
        if changes.contains(ChangeKind::AcceptableAdsChanged) && settings.acceptable_ads_enabled {
            new_urls.push(self.lists.acceptable_ads.url.clone());
        }
        let (local_files, remote): (Vec<Subscription>, Vec<Subscription>) =
            active.iter().cloned().partition(Subscription::is_local_file);

        self.publish(SyncStatus::Downloading(0));
        let mut downloaded = Vec::with_capacity(remote.len());
        let mut failed = Vec::new();
        for (index, subscription) in remote.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let mode = DownloadMode {
                forced: trigger.is_forced(),
                periodic: trigger.is_periodic(),
                new_subscription: new_urls.contains(&subscription.url),
            };
            let result = self.downloader.download(subscription, mode).await;
            debug!("Subscription: {} -> {:?}", subscription.display_title(), result);
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match result {
                DownloadResult::Success(record) | DownloadResult::NotModified(record) => {
                    self.store
                        .update(&mut |data| data.upsert_downloaded(record.clone()))?;
                    downloaded.push(record);
                }
                DownloadResult::Failed(_) => failed.push(subscription.url.clone()),
            }
            self.publish(SyncStatus::Downloading(index + 1));
        }

        if !failed.is_empty() {
            warn!(
                "{} of {} subscriptions failed ({}), retrying later",
                failed.len(),
                remote.len(),
                failed.join(", ")
            );
            self.analytics.log_event(AnalyticsEvent::SyncFailed);
            self.publish(SyncStatus::Failed);
            return Ok(WorkResult::Retry);
        }

        self.commit(trigger, &settings, &active, &downloaded, &local_files)?;
        self.analytics.log_event(AnalyticsEvent::SyncSucceeded);
        self.analytics.set_user_property(
            "acceptable_ads_enabled",
            &settings.acceptable_ads_enabled.to_string(),
        );
        self.publish(SyncStatus::Success);
        Ok(WorkResult::Success)
    }

    /// Merges and persists the outcome of a fully successful pass.
    fn commit(
        &self,
        trigger: Trigger,
        settings: &Settings,
        active: &[Subscription],
        downloaded: &[DownloadedSubscription],
        local_files: &[Subscription],
    ) -> Result<()> {
        let custom = CustomRules {
            allowed_domains: settings.allowed_domains.clone(),
            blocked_domains: settings.blocked_domains.clone(),
        };
        let outcome = self
            .merger
            .merge(downloaded, local_files, &custom, self.store.as_ref())?;

        let now = self.clock.now();
        let saved_state = settings.to_saved_state();
        let refreshed = trigger.is_forced() || trigger.is_periodic();
        let mut removed = Vec::new();
        self.store.update(&mut |data| {
            removed = data.retain_downloaded(active.iter().map(|s| s.url.as_str()));
            data.saved_state = saved_state.clone();
            if refreshed {
                data.last_updated = Some(now);
            }
        })?;

        for record in removed {
            debug!("Removing inactive subscription file {}", record.path.display());
            if let Err(e) = fs::remove_file(&record.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", record.path.display(), e);
                }
            }
        }
        self.merger.clean_stale(&outcome.path);

        let mut last_updates: Vec<(String, DateTime<Utc>)> = downloaded
            .iter()
            .filter_map(|d| d.last_updated.map(|at| (d.url.clone(), at)))
            .collect();
        last_updates.extend(
            local_files
                .iter()
                .filter(|s| !outcome.unreadable.contains(&s.url))
                .map(|s| (s.url.clone(), now)),
        );
        self.settings
            .update_subscription_status(&last_updates, &outcome.unreadable)?;

        info!(
            "Sync complete: {} lists, {} rules in {}",
            downloaded.len() + local_files.len() - outcome.unreadable.len(),
            outcome.rules,
            outcome.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::domain::SubscriptionType;
    use crate::ports::testing::{FixedClock, RecordingAnalytics};
    use crate::settings::FileSettings;
    use crate::store::SqliteStore;
    use crate::sync::testing::FakeDownloader;

    const DEFAULT_URL: &str = "https://lists.test/easylist.txt";
    const AA_URL: &str = "https://lists.test/exceptionrules.txt";

    struct Harness {
        store: Arc<SqliteStore>,
        settings: Arc<FileSettings>,
        downloader: Arc<FakeDownloader>,
        analytics: Arc<RecordingAnalytics>,
        status: watch::Receiver<SyncStatus>,
        cancel: CancellationToken,
        worker: SyncWorker,
        _dir: tempfile::TempDir,
    }

    fn lists() -> BuiltinLists {
        BuiltinLists {
            default: Subscription::new(DEFAULT_URL, "EasyList", SubscriptionType::Default),
            acceptable_ads: Subscription::new(AA_URL, "Acceptable Ads", SubscriptionType::Default),
        }
    }

    fn sub(url: &str) -> Subscription {
        Subscription::new(url, "", SubscriptionType::FromUrl)
    }

    fn harness(settings: Settings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let settings = Arc::new(FileSettings::in_memory(settings));
        let downloader = Arc::new(FakeDownloader::new(dir.path().join("downloads")));
        let analytics = Arc::new(RecordingAnalytics::default());
        let (tx, status) = watch::channel(SyncStatus::Idle);
        let cancel = CancellationToken::new();
        let worker = SyncWorker::new(
            store.clone(),
            settings.clone(),
            downloader.clone(),
            Arc::new(Merger::new(dir.path().join("filters"))),
            Arc::new(FixedClock::at("2021-09-23T17:31:01Z")),
            analytics.clone(),
            Arc::new(tx),
            lists(),
            4,
            cancel.clone(),
        );
        Harness {
            store,
            settings,
            downloader,
            analytics,
            status,
            cancel,
            worker,
            _dir: dir,
        }
    }

    fn three_lists() -> Settings {
        Settings {
            acceptable_ads_enabled: false,
            active_other_subscriptions: vec![
                sub("https://lists.test/b.txt"),
                sub("https://lists.test/c.txt"),
            ],
            ..Settings::default()
        }
    }

    fn merged(store: &SqliteStore) -> (std::path::PathBuf, String) {
        let path = store.subscriptions_path().unwrap().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        (path, content)
    }

    const FORCED: Trigger = Trigger::OneShot { forced: true };
    const UNFORCED: Trigger = Trigger::OneShot { forced: false };

    #[test]
    fn test_active_set_always_has_default_and_optional_aa() {
        let mut settings = three_lists();
        let urls = |s: &Settings| -> Vec<String> {
            active_subscriptions(s, &lists()).into_iter().map(|s| s.url).collect()
        };

        assert_eq!(
            urls(&settings),
            vec![DEFAULT_URL, "https://lists.test/b.txt", "https://lists.test/c.txt"]
        );

        settings.acceptable_ads_enabled = true;
        settings.active_primary_subscriptions = vec![sub(DEFAULT_URL)];
        settings.active_other_subscriptions.push(sub(DEFAULT_URL));
        assert_eq!(
            urls(&settings),
            vec![DEFAULT_URL, "https://lists.test/b.txt", "https://lists.test/c.txt", AA_URL]
        );
    }

    #[tokio::test]
    async fn test_successful_pass_merges_and_saves_state() {
        let h = harness(Settings {
            allowed_domains: vec!["good.example".into()],
            ..three_lists()
        });

        let result = h.worker.run(FORCED, 0).await;

        assert_eq!(result, WorkResult::Success);
        assert_eq!(*h.status.borrow(), SyncStatus::Success);
        let (_, content) = merged(&h.store);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.iter().filter(|l| **l == "||shared.example^").count(), 1);
        assert!(lines.contains(&"@@||good.example^$document"));
        assert!(lines.contains(&"||easylist.example^"));
        assert!(lines.contains(&"||c.example^"));
        assert!(!lines.iter().any(|l| l.starts_with('!') || l.starts_with('[')));

        let data = h.store.get().unwrap();
        assert_eq!(data.saved_state, h.settings.current().to_saved_state());
        assert_eq!(data.downloaded_subscriptions.len(), 3);
        assert!(data.last_updated.is_some());
        assert!(h.settings.current().active_other_subscriptions[0]
            .last_update
            .is_some());
        assert_eq!(
            *h.analytics.events.lock().unwrap(),
            vec![AnalyticsEvent::SyncSucceeded]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_previous_state() {
        let h = harness(three_lists());
        assert_eq!(h.worker.run(FORCED, 0).await, WorkResult::Success);
        let (path_before, content_before) = merged(&h.store);
        let saved_before = h.store.get().unwrap().saved_state;

        h.settings
            .set_blocked_domains(vec!["bad.example".into()])
            .unwrap();
        h.downloader.fail("https://lists.test/c.txt");
        let result = h.worker.run(UNFORCED, 0).await;

        assert_eq!(result, WorkResult::Retry);
        assert_eq!(*h.status.borrow(), SyncStatus::Failed);
        let (path_after, content_after) = merged(&h.store);
        assert_eq!(path_after, path_before);
        assert_eq!(content_after, content_before);
        assert_eq!(h.store.get().unwrap().saved_state, saved_before);
    }

    #[tokio::test]
    async fn test_unchanged_settings_skip_network() {
        let h = harness(three_lists());
        h.worker.run(FORCED, 0).await;
        let calls = h.downloader.call_count();

        assert_eq!(h.worker.run(UNFORCED, 0).await, WorkResult::Success);
        assert_eq!(h.downloader.call_count(), calls);

        // Retries and periodic passes run anyway
        h.worker.run(UNFORCED, 1).await;
        h.worker.run(Trigger::Periodic, 0).await;
        assert_eq!(h.downloader.call_count(), calls + 6);
    }

    #[tokio::test]
    async fn test_download_mode_marks_new_and_periodic() {
        let h = harness(three_lists());
        h.worker.run(FORCED, 0).await;
        assert!(h.downloader.mode_of_last(DEFAULT_URL).unwrap().forced);

        let mut others = three_lists().active_other_subscriptions;
        others.push(sub("https://lists.test/d.txt"));
        h.settings.set_active_other_subscriptions(others).unwrap();
        h.settings.set_acceptable_ads_enabled(true).unwrap();
        h.worker.run(UNFORCED, 0).await;

        let new = h.downloader.mode_of_last("https://lists.test/d.txt").unwrap();
        assert!(new.new_subscription && !new.forced && !new.periodic);
        assert!(h.downloader.mode_of_last(AA_URL).unwrap().new_subscription);
        assert!(!h.downloader.mode_of_last("https://lists.test/b.txt").unwrap().new_subscription);

        h.worker.run(Trigger::Periodic, 0).await;
        let periodic = h.downloader.mode_of_last("https://lists.test/d.txt").unwrap();
        assert!(periodic.periodic && !periodic.new_subscription);
    }

    #[tokio::test]
    async fn test_attempt_limit_is_terminal() {
        let h = harness(three_lists());

        assert_eq!(h.worker.run(FORCED, 5).await, WorkResult::Failure);
        assert_eq!(h.downloader.call_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_subscription_is_pruned() {
        let h = harness(three_lists());
        h.worker.run(FORCED, 0).await;
        let c_path = h
            .store
            .get()
            .unwrap()
            .downloaded("https://lists.test/c.txt")
            .unwrap()
            .path
            .clone();

        h.settings
            .set_active_other_subscriptions(vec![sub("https://lists.test/b.txt")])
            .unwrap();
        assert_eq!(h.worker.run(UNFORCED, 0).await, WorkResult::Success);

        let data = h.store.get().unwrap();
        assert!(data.downloaded("https://lists.test/c.txt").is_none());
        assert!(!c_path.exists());
        let (_, content) = merged(&h.store);
        assert!(!content.contains("||c.example^"));
    }

    #[tokio::test]
    async fn test_unreadable_local_file_is_flagged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let readable = dir.path().join("mine.txt");
        fs::write(&readable, "||mine.example^\n").unwrap();
        let missing = dir.path().join("missing.txt");
        let local = |p: &Path| {
            Subscription::new(p.to_string_lossy(), "", SubscriptionType::FromFile)
        };
        let h = harness(Settings {
            acceptable_ads_enabled: false,
            active_other_subscriptions: vec![local(&readable), local(&missing)],
            ..Settings::default()
        });

        assert_eq!(h.worker.run(FORCED, 0).await, WorkResult::Success);

        let (_, content) = merged(&h.store);
        assert!(content.contains("||mine.example^"));
        let others = h.settings.current().active_other_subscriptions;
        assert!(!others[0].has_error);
        assert!(others[0].last_update.is_some());
        assert!(others[1].has_error);
        // Only the default list goes over the network
        assert_eq!(h.downloader.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_is_success_without_failed_status() {
        let h = harness(three_lists());
        h.cancel.cancel();

        assert_eq!(h.worker.run(FORCED, 0).await, WorkResult::Success);
        assert_ne!(*h.status.borrow(), SyncStatus::Failed);
        assert_eq!(h.downloader.call_count(), 0);
    }

    #[tokio::test]
    async fn test_download_progress_is_published() {
        let h = harness(three_lists());
        let mut status = h.status.clone();
        status.borrow_and_update();
        h.downloader.fail("https://lists.test/b.txt");

        h.worker.run(FORCED, 0).await;

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), SyncStatus::Failed);
        // The failing list does not stop the others from being fetched
        assert_eq!(h.downloader.call_count(), 3);
        assert!(h
            .store
            .get()
            .unwrap()
            .downloaded("https://lists.test/c.txt")
            .is_some());
    }
}
