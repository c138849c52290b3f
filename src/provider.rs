//! Read access to the consolidated filter file for the content blocker.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::app::{Result, SyncError};
use crate::filters::to_allow_rule;
use crate::ports::{Analytics, AnalyticsEvent, Clock};
use crate::settings::SettingsRepository;
use crate::store::CoreStore;
use crate::sync::BuiltinLists;
use crate::telemetry::counted_today;

pub const FALLBACK_FILE_NAME: &str = "default_subscriptions.txt";

pub struct FilterListProvider {
    store: Arc<dyn CoreStore>,
    settings: Arc<dyn SettingsRepository>,
    analytics: Arc<dyn Analytics>,
    clock: Arc<dyn Clock>,
    lists: BuiltinLists,
    fallback_dir: PathBuf,
    count_requests: Arc<Notify>,
}

impl FilterListProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoreStore>,
        settings: Arc<dyn SettingsRepository>,
        analytics: Arc<dyn Analytics>,
        clock: Arc<dyn Clock>,
        lists: BuiltinLists,
        fallback_dir: impl Into<PathBuf>,
        count_requests: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            settings,
            analytics,
            clock,
            lists,
            fallback_dir: fallback_dir.into(),
            count_requests,
        }
    }

    /// Path of the current consolidated file, if a merge has happened.
    pub fn current_path(&self) -> Result<Option<PathBuf>> {
        self.store.subscriptions_path()
    }

    /// Opens the filter file the browser should load.
    ///
    /// Every request is treated as a sign of use, so the user is counted if that has
    /// not happened today. Without a consolidated file the cached built-in lists plus
    /// the allowed domains are served instead.
    pub fn open(&self) -> Result<File> {
        info!("Filter list requested");
        self.analytics.log_event(AnalyticsEvent::FilterListRequested);
        self.request_count_if_due();

        let opened = self.filter_path().and_then(|path| {
            debug!("Returning {}", path.display());
            File::open(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SyncError::NotFound(format!("filter list {} is missing", path.display()))
                }
                _ => e.into(),
            })
        });
        if let Err(e) = &opened {
            error!("Cannot serve filter list: {}", e);
            self.analytics.log_exception(e);
        }
        opened
    }

    fn request_count_if_due(&self) {
        match self.store.get() {
            Ok(data) if counted_today(data.last_user_counting_response, self.clock.now()) => {
                debug!("Skip user counting");
            }
            Ok(data) => {
                debug!(
                    "User count lastUserCountingResponse saved is `{}`",
                    data.last_user_counting_response
                );
                self.count_requests.notify_one();
            }
            Err(e) => warn!("Cannot read user counting state: {}", e),
        }
    }

    fn filter_path(&self) -> Result<PathBuf> {
        let fallback = self.fallback_dir.join(FALLBACK_FILE_NAME);
        if let Err(e) = fs::remove_file(&fallback) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not delete {}: {}", fallback.display(), e);
            }
        }

        if let Some(path) = self.current_path()?.filter(|p| p.exists()) {
            return Ok(path);
        }
        self.write_fallback(fallback)
    }

    /// Concatenates the cached Acceptable Ads (when enabled) and default lists, then
    /// appends one allow rule per allowed domain.
    fn write_fallback(&self, target: PathBuf) -> Result<PathBuf> {
        let settings = self.settings.current();
        let data = self.store.get()?;

        let mut sources = Vec::new();
        if settings.acceptable_ads_enabled {
            sources.extend(data.downloaded(&self.lists.acceptable_ads.url));
        }
        sources.extend(data.downloaded(&self.lists.default.url));
        let sources: Vec<_> = sources.into_iter().filter(|s| s.exists()).collect();
        if sources.is_empty() {
            return Err(SyncError::NotFound("no filter list has been merged yet".into()));
        }

        info!("No consolidated filter file, serving {} cached lists", sources.len());
        fs::create_dir_all(&self.fallback_dir)?;
        let temp = tempfile::Builder::new()
            .prefix("filters")
            .suffix(".txt")
            .tempfile_in(&self.fallback_dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for source in &sources {
                let mut input = File::open(&source.path)?;
                std::io::copy(&mut input, &mut writer)?;
            }
            for domain in &settings.allowed_domains {
                writer.write_all(b"\n")?;
                writer.write_all(to_allow_rule(domain).as_bytes())?;
            }
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.persist(&target)?;
        Ok(target)
    }
}
