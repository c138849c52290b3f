//! Diffing, scheduling and execution of sync passes.
pub mod diff;
pub mod scheduler;
pub mod work;
pub mod worker;

pub use diff::{diff, ChangeKind, Changes};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use work::{Backoff, NetworkConstraint, Trigger, WorkRequest, WorkResult, WorkSlot};
pub use worker::{active_subscriptions, BuiltinLists, SyncWorker};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::{DownloadedSubscription, Subscription};
    use crate::fetcher::{DownloadMode, DownloadResult, Downloader};

    /// Writes one rule per URL into `dir`; URLs in `failing` return `Failed`.
    pub struct FakeDownloader {
        dir: PathBuf,
        pub failing: Mutex<HashSet<String>>,
        pub calls: Mutex<Vec<(String, DownloadMode)>>,
    }

    impl FakeDownloader {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self {
                dir: dir.into(),
                failing: Mutex::new(HashSet::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn fail(&self, url: &str) {
            self.failing.lock().unwrap().insert(url.to_string());
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn mode_of_last(&self, url: &str) -> Option<DownloadMode> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(u, _)| u == url)
                .map(|(_, mode)| *mode)
        }

        pub fn rule_for(url: &str) -> String {
            let name = url.rsplit('/').next().unwrap_or(url).replace(".txt", "");
            format!("||{}.example^", name)
        }
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, subscription: &Subscription, mode: DownloadMode) -> DownloadResult {
            self.calls
                .lock()
                .unwrap()
                .push((subscription.url.clone(), mode));
            if self.failing.lock().unwrap().contains(&subscription.url) {
                return DownloadResult::Failed(None);
            }

            std::fs::create_dir_all(&self.dir).unwrap();
            let path = self
                .dir
                .join(crate::fetcher::downloader::file_name_for(&subscription.url));
            let body = format!(
                "[Adblock Plus 2.0]\n! Version: 1\n{}\n||shared.example^\n",
                Self::rule_for(&subscription.url)
            );
            std::fs::write(&path, body).unwrap();

            let mut record = DownloadedSubscription::new(subscription.url.clone(), path);
            record.version = "1".into();
            record.download_count = 1;
            record.last_updated = Some(chrono::Utc::now());
            DownloadResult::Success(record)
        }

        async fn validate(&self, subscription: &Subscription) -> bool {
            !self.failing.lock().unwrap().contains(&subscription.url)
        }
    }
}
