use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::app::error::Result;
use crate::config::Config;
use crate::domain::SyncStatus;
use crate::fetcher::{HttpClient, HttpDownloader, ReqwestHttpClient};
use crate::filters::Merger;
use crate::ports::{
    Analytics, Clock, Connectivity, StaticConnectivity, SystemClock, TracingAnalytics,
};
use crate::provider::FilterListProvider;
use crate::settings::{FileSettings, SettingsRepository};
use crate::store::sqlite::SqliteStore;
use crate::store::CoreStore;
use crate::sync::{SyncScheduler, SyncWorker};
use crate::telemetry::{HttpUserCounter, TelemetryScheduler, UserCounter};

pub struct AppContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub store: Arc<SqliteStore>,
    pub settings: Arc<FileSettings>,
    pub scheduler: Arc<SyncScheduler>,
    pub user_counter: Arc<dyn UserCounter>,
    pub telemetry: Arc<TelemetryScheduler>,
    pub provider: FilterListProvider,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(config.sync.http_timeout)?);
        Self::with_http(config, &data_dir, http)
    }

    /// Wires every component under `data_dir` around the given HTTP client.
    pub fn with_http(config: Config, data_dir: &Path, http: Arc<dyn HttpClient>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let store = Arc::new(SqliteStore::new(data_dir.join("filtersync.db"))?);
        let settings = Arc::new(FileSettings::open(data_dir.join("settings.toml"))?);
        let analytics: Arc<dyn Analytics> = Arc::new(TracingAnalytics);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(SyncStatus::Idle);
        let status = Arc::new(status);

        let core: Arc<dyn CoreStore> = store.clone();
        let repository: Arc<dyn SettingsRepository> = settings.clone();
        let connectivity: Arc<dyn Connectivity> = Arc::new(StaticConnectivity(config.sync.network));

        let downloader = Arc::new(HttpDownloader::new(
            http.clone(),
            core.clone(),
            analytics.clone(),
            clock.clone(),
            connectivity.clone(),
            config.app.clone(),
            data_dir.join("downloads"),
            config.sync.retry_policy(),
            config.sync.refresh_policy(),
            cancel.clone(),
        ));
        let worker = SyncWorker::new(
            core.clone(),
            repository.clone(),
            downloader,
            Arc::new(Merger::new(data_dir.join("filters"))),
            clock.clone(),
            analytics.clone(),
            status.clone(),
            config.subscriptions.builtin_lists(),
            config.sync.max_attempts,
            cancel.clone(),
        );
        let scheduler = Arc::new(SyncScheduler::new(
            worker,
            core.clone(),
            repository.clone(),
            connectivity,
            clock.clone(),
            status,
            config.sync.scheduler(),
            cancel.clone(),
        )
        .with_pass_lock(data_dir.join("sync.lock")));

        let user_counter: Arc<dyn UserCounter> = Arc::new(HttpUserCounter::new(
            http,
            core.clone(),
            repository.clone(),
            analytics.clone(),
            clock.clone(),
            config.app.clone(),
            config.telemetry_endpoint(),
            config.sync.retry_policy(),
            cancel.clone(),
        ));
        let telemetry = Arc::new(TelemetryScheduler::new(
            user_counter.clone(),
            analytics.clone(),
            config.telemetry.schedule(),
            cancel.clone(),
        ));
        let provider = FilterListProvider::new(
            core,
            repository,
            analytics,
            clock,
            config.subscriptions.builtin_lists(),
            data_dir.join("cache"),
            telemetry.count_requests(),
        );

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            provider,
            store,
            settings,
            scheduler,
            user_counter,
            telemetry,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::fetcher::testing::{FakeHttpClient, Scripted};
    use crate::sync::{Trigger, WorkResult};
    use crate::telemetry::CountResult;

    #[tokio::test]
    async fn test_forced_sync_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttpClient::new());
        http.route(
            "/easylist.txt",
            Scripted::ok("[Adblock Plus 2.0]\n! Version: 202109091143\n||ads.example.com^\n||shared.example^\n"),
        );
        http.route(
            "/exceptionrules.txt",
            Scripted::ok("[Adblock Plus 2.0]\n@@||ok.example^$document\n||shared.example^\n")
                .with_header("date", "Thu, 23 Sep 2021 17:31:01 GMT"),
        );
        let ctx = AppContext::with_http(Config::default(), dir.path(), http.clone()).unwrap();
        ctx.settings
            .set_allowed_domains(vec!["good.example".into()])
            .unwrap();

        let result = ctx.scheduler.execute(Trigger::OneShot { forced: true }, 0).await;

        assert_eq!(result, WorkResult::Success);
        let mut merged = String::new();
        ctx.provider.open().unwrap().read_to_string(&mut merged).unwrap();
        assert_eq!(
            merged,
            "@@||good.example^$document\n||ads.example.com^\n||shared.example^\n@@||ok.example^$document\n"
        );
        let data = ctx.store.get().unwrap();
        assert_eq!(data.downloaded_subscriptions.len(), 2);
        assert_eq!(
            data.downloaded(crate::config::EASYLIST_URL).unwrap().version,
            "202109091143"
        );

        assert_eq!(ctx.user_counter.count().await.unwrap(), CountResult::Success);
    }

    #[tokio::test]
    async fn test_overlapping_syncs_of_two_processes_leave_one_filter_file() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttpClient::new());
        http.route("/easylist.txt", Scripted::ok("||ads.example.com^\n"));
        http.route("/exceptionrules.txt", Scripted::ok("@@||ok.example^$document\n"));
        let first = AppContext::with_http(Config::default(), dir.path(), http.clone()).unwrap();
        let second = AppContext::with_http(Config::default(), dir.path(), http).unwrap();

        let (a, b) = tokio::join!(
            first.scheduler.execute(Trigger::OneShot { forced: true }, 0),
            second.scheduler.execute(Trigger::OneShot { forced: true }, 0),
        );

        assert_eq!((a, b), (WorkResult::Success, WorkResult::Success));
        let current = first.provider.current_path().unwrap().unwrap();
        assert!(current.exists());
        let files: Vec<_> = std::fs::read_dir(dir.path().join("filters"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files, vec![current]);
    }

    #[test]
    fn test_settings_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let http: Arc<dyn HttpClient> = Arc::new(FakeHttpClient::new());
        {
            let ctx = AppContext::with_http(Config::default(), dir.path(), http.clone()).unwrap();
            ctx.settings.set_acceptable_ads_enabled(false).unwrap();
        }

        let ctx = AppContext::with_http(Config::default(), dir.path(), http).unwrap();
        assert!(!ctx.settings.current().acceptable_ads_enabled);
    }
}
