use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::{Analytics, AnalyticsEvent};
use crate::sync::Backoff;
use crate::telemetry::{CountResult, UserCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySchedule {
    pub interval: Duration,
    pub backoff: Duration,
    pub max_attempts: u32,
}

impl Default for TelemetrySchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(12 * 60 * 60),
            backoff: Duration::from_secs(2 * 60),
            max_attempts: 8,
        }
    }
}

/// Runs the counting ping on its own cadence, independent of sync passes.
pub struct TelemetryScheduler {
    counter: Arc<dyn UserCounter>,
    analytics: Arc<dyn Analytics>,
    schedule: TelemetrySchedule,
    requests: Arc<Notify>,
    cancel: CancellationToken,
}

impl TelemetryScheduler {
    pub fn new(
        counter: Arc<dyn UserCounter>,
        analytics: Arc<dyn Analytics>,
        schedule: TelemetrySchedule,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            counter,
            analytics,
            schedule,
            requests: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Handle that starts a counting round ahead of the regular interval.
    pub fn count_requests(&self) -> Arc<Notify> {
        self.requests.clone()
    }

    pub async fn run(&self) {
        info!("User counting scheduled every {:?}", self.schedule.interval);
        loop {
            if !self.run_once().await {
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.schedule.interval) => {}
                _ = self.requests.notified() => debug!("User counting requested"),
            }
        }
    }

    /// One counting round with retries. Returns false once cancelled.
    pub async fn run_once(&self) -> bool {
        let backoff = Backoff::exponential(self.schedule.backoff);
        let mut attempt = 0;

        loop {
            if attempt > self.schedule.max_attempts {
                info!("User counting max retries reached");
                self.analytics.log_event(AnalyticsEvent::HeadRequestFailed);
                return true;
            }

            match self.counter.count().await {
                Ok(CountResult::Success) => {
                    info!("User counted");
                    return true;
                }
                Ok(CountResult::Skipped) => {
                    debug!("User counting skipped");
                    return true;
                }
                Err(e) if e.is_cancelled() => return false,
                Ok(CountResult::Failed) => warn!("User counting failed, retry scheduled"),
                Err(e) => warn!("User counting failed, retry scheduled: {}", e),
            }

            attempt += 1;
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff.delay(attempt)) => {}
            }
        }
    }
}
