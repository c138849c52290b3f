//! One-shot and periodic sync triggers sharing a single pipeline.
//!
//! Each trigger kind owns a [`WorkSlot`]. A driver task per slot waits for the
//! pending request to become due, runs the pass under the pipeline lock and
//! resubmits according to the [`WorkResult`]. A settings listener debounces
//! edits and feeds the one-shot slot. With a pass lock configured, passes are
//! also exclusive across processes sharing the data directory.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::{FileLock, Result};
use crate::domain::{Settings, Subscription, SubscriptionType, SyncStatus, UpdateConfig};
use crate::ports::{Clock, Connectivity};
use crate::settings::SettingsRepository;
use crate::store::CoreStore;
use crate::sync::work::{Backoff, NetworkConstraint, Trigger, WorkRequest, WorkResult, WorkSlot};
use crate::sync::worker::SyncWorker;

const PASS_LOCK_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub periodic_interval: Duration,
    /// Periodic runs become due this long before the interval ends.
    pub flex: Duration,
    pub initial_delay: Duration,
    pub backoff: Duration,
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_secs(6 * 60 * 60),
            flex: Duration::from_secs(30 * 60),
            initial_delay: Duration::from_secs(6 * 60 * 60),
            backoff: Duration::from_secs(60),
            debounce: Duration::from_millis(500),
        }
    }
}

pub struct SyncScheduler {
    worker: SyncWorker,
    store: Arc<dyn CoreStore>,
    settings: Arc<dyn SettingsRepository>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    status: Arc<watch::Sender<SyncStatus>>,
    one_shot: WorkSlot,
    periodic: WorkSlot,
    pipeline: Mutex<()>,
    pass_lock: Option<PathBuf>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: SyncWorker,
        store: Arc<dyn CoreStore>,
        settings: Arc<dyn SettingsRepository>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        status: Arc<watch::Sender<SyncStatus>>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker,
            store,
            settings,
            connectivity,
            clock,
            status,
            one_shot: WorkSlot::new("one-shot"),
            periodic: WorkSlot::new("periodic"),
            pipeline: Mutex::new(()),
            pass_lock: None,
            config,
            cancel,
        }
    }

    /// Holds `path` exclusively for the duration of every pass.
    pub fn with_pass_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.pass_lock = Some(path.into());
        self
    }

    /// Arms the periodic slot; on the very first run also queues a forced sync.
    pub fn initialize(&self) -> Result<()> {
        let data = self.store.get()?;
        let update_config = self.settings.current().update_config;

        if data.configured {
            let delay = self.initial_periodic_delay(data.last_updated);
            debug!("Periodic sync due in {:?}", delay);
            self.arm_periodic(update_config, delay);
            return Ok(());
        }

        info!("First run, scheduling initial sync");
        self.schedule_immediate(true);
        self.arm_periodic(update_config, self.config.initial_delay);
        self.store.update(&mut |data| data.configured = true)?;
        Ok(())
    }

    fn initial_periodic_delay(&self, last_updated: Option<DateTime<Utc>>) -> Duration {
        let (Some(at), Ok(delay)) = (
            last_updated,
            chrono::Duration::from_std(self.config.initial_delay),
        ) else {
            return self.config.initial_delay;
        };
        (at + delay - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn backoff(&self) -> Backoff {
        Backoff::exponential(self.config.backoff)
    }

    fn period(&self) -> Duration {
        self.config
            .periodic_interval
            .saturating_sub(self.config.flex)
    }

    /// Queues a one-shot sync, replacing any one already waiting. A replaced
    /// forced request keeps the replacement forced.
    pub fn schedule_immediate(&self, force: bool) {
        let forced = force
            || self
                .one_shot
                .pending()
                .is_some_and(|r| r.trigger.is_forced());
        self.one_shot
            .replace(WorkRequest::one_shot(forced, self.backoff()));
    }

    /// Cancels and resubmits the periodic request with the cadence's constraint.
    pub fn arm_periodic(&self, update_config: UpdateConfig, delay: Duration) {
        let constraint = NetworkConstraint::for_update_config(update_config);
        debug!("Arming periodic sync ({:?}) in {:?}", constraint, delay);
        self.periodic
            .replace(WorkRequest::periodic(constraint, self.backoff(), delay));
    }

    pub fn pending_one_shot(&self) -> Option<WorkRequest> {
        self.one_shot.pending()
    }

    pub fn pending_periodic(&self) -> Option<WorkRequest> {
        self.periodic.pending()
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Runs a pass right away, waiting for any pass already in progress.
    pub async fn execute(&self, trigger: Trigger, attempt: u32) -> WorkResult {
        let _pipeline = self.pipeline.lock().await;
        let _pass_lock = match &self.pass_lock {
            Some(path) => match FileLock::acquire(path, PASS_LOCK_POLL, &self.cancel).await {
                Ok(lock) => {
                    debug!("Holding {}", lock.path().display());
                    Some(lock)
                }
                Err(e) if e.is_cancelled() => return WorkResult::Success,
                Err(e) => {
                    warn!("Cannot lock {}: {}", path.display(), e);
                    return WorkResult::Retry;
                }
            },
            None => None,
        };
        self.worker.run(trigger, attempt).await
    }

    pub async fn validate_subscription(&self, url: &str) -> bool {
        let subscription = Subscription::new(url, "", SubscriptionType::FromUrl);
        self.worker.downloader().validate(&subscription).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Drives both slots and the settings listener until shutdown.
    pub async fn run(&self) {
        info!("Sync scheduler started");
        tokio::join!(
            self.drive(&self.one_shot),
            self.drive(&self.periodic),
            self.watch_settings(),
        );
        info!("Sync scheduler stopped");
    }

    async fn drive(&self, slot: &WorkSlot) {
        while let Some(request) = slot.next(self.connectivity.as_ref(), &self.cancel).await {
            if request.attempt > 0 {
                self.status.send_replace(SyncStatus::Idle);
            }
            let result = self.execute(request.trigger, request.attempt).await;
            debug!("{} sync finished: {:?}", slot.name(), result);
            self.reschedule(slot, &request, result);
        }
    }

    fn reschedule(&self, slot: &WorkSlot, request: &WorkRequest, result: WorkResult) {
        match (result, request.trigger) {
            (WorkResult::Retry, _) => {
                let retry = request.retried();
                info!(
                    "{} sync retry #{} in {:?}",
                    slot.name(),
                    retry.attempt,
                    request.backoff.delay(retry.attempt)
                );
                slot.submit_if_empty(retry);
            }
            (_, Trigger::Periodic) => {
                slot.submit_if_empty(WorkRequest::periodic(
                    request.constraint,
                    request.backoff,
                    self.period(),
                ));
            }
            _ => {}
        }
    }

    async fn watch_settings(&self) {
        let mut rx = self.settings.subscribe();
        let mut last = rx.borrow_and_update().clone();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = rx.changed() => if changed.is_err() { return; },
            }
            // Wait for a quiet period before acting on a burst of edits
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.debounce) => break,
                    changed = rx.changed() => if changed.is_err() { return; },
                }
            }

            let current = rx.borrow_and_update().clone();
            self.on_settings_changed(&last, &current);
            last = current;
        }
    }

    fn on_settings_changed(&self, previous: &Settings, current: &Settings) {
        if previous.content_changed(current) {
            debug!("Settings content changed, scheduling sync");
            self.schedule_immediate(false);
        }
        if previous.update_config_changed(current) {
            debug!("Update cadence changed to {:?}", current.update_config);
            self.arm_periodic(current.update_config, self.config.initial_delay);
        }
    }
}
