//! Named single-entry work slots standing in for a platform job queue.
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::UpdateConfig;
use crate::ports::{Connectivity, NetworkState};

/// Longest delay a retry may be pushed out to.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);
/// How often a due request re-checks an unmet network constraint.
pub const CONSTRAINT_RECHECK: Duration = Duration::from_secs(60);

/// Outcome of one unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    Success,
    /// Reschedule the same request with backoff.
    Retry,
    /// Terminal; no automatic retry.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    OneShot { forced: bool },
    Periodic,
}

impl Trigger {
    pub fn is_forced(&self) -> bool {
        matches!(self, Trigger::OneShot { forced: true })
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self, Trigger::Periodic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkConstraint {
    NotRequired,
    Connected,
    Unmetered,
}

impl NetworkConstraint {
    pub fn for_update_config(config: UpdateConfig) -> Self {
        match config {
            UpdateConfig::WifiOnly => NetworkConstraint::Unmetered,
            UpdateConfig::Always => NetworkConstraint::Connected,
        }
    }

    pub fn is_met(self, state: NetworkState) -> bool {
        match self {
            NetworkConstraint::NotRequired => true,
            NetworkConstraint::Connected => state != NetworkState::Disconnected,
            NetworkConstraint::Unmetered => state == NetworkState::Unmetered,
        }
    }
}

/// Exponential backoff: `initial * 2^(attempt - 1)`, capped at [`MAX_BACKOFF`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
}

impl Backoff {
    pub fn exponential(initial: Duration) -> Self {
        Self { initial }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub trigger: Trigger,
    pub constraint: NetworkConstraint,
    pub backoff: Backoff,
    pub not_before: Instant,
    /// Zero for the first run, incremented on every retry.
    pub attempt: u32,
}

impl WorkRequest {
    pub fn one_shot(forced: bool, backoff: Backoff) -> Self {
        Self {
            trigger: Trigger::OneShot { forced },
            constraint: NetworkConstraint::NotRequired,
            backoff,
            not_before: Instant::now(),
            attempt: 0,
        }
    }

    pub fn periodic(constraint: NetworkConstraint, backoff: Backoff, delay: Duration) -> Self {
        Self {
            trigger: Trigger::Periodic,
            constraint,
            backoff,
            not_before: Instant::now() + delay,
            attempt: 0,
        }
    }

    pub fn retried(&self) -> Self {
        let attempt = self.attempt + 1;
        Self {
            attempt,
            not_before: Instant::now() + self.backoff.delay(attempt),
            ..self.clone()
        }
    }
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    pending: Option<WorkRequest>,
}

/// Holds at most one pending request; submitting replaces whatever is queued.
pub struct WorkSlot {
    name: &'static str,
    state: Mutex<SlotState>,
    notify: Notify,
}

impl WorkSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true when an already queued request was dropped.
    pub fn replace(&self, request: WorkRequest) -> bool {
        let replaced = {
            let mut state = self.lock();
            state.generation += 1;
            state.pending.replace(request).is_some()
        };
        debug!("{} slot: submitted (replaced: {})", self.name, replaced);
        self.notify.notify_one();
        replaced
    }

    /// Queues `request` only if nothing else was submitted meanwhile.
    pub fn submit_if_empty(&self, request: WorkRequest) -> bool {
        let submitted = {
            let mut state = self.lock();
            if state.pending.is_some() {
                false
            } else {
                state.generation += 1;
                state.pending = Some(request);
                true
            }
        };
        if submitted {
            self.notify.notify_one();
        }
        submitted
    }

    pub fn cancel(&self) -> Option<WorkRequest> {
        let cancelled = {
            let mut state = self.lock();
            state.generation += 1;
            state.pending.take()
        };
        self.notify.notify_one();
        cancelled
    }

    pub fn pending(&self) -> Option<WorkRequest> {
        self.lock().pending.clone()
    }

    /// Waits until the pending request is due and its constraint holds, then takes it.
    ///
    /// Returns `None` once `cancel` fires. Only one task may wait on a slot.
    pub async fn next(
        &self,
        connectivity: &dyn Connectivity,
        cancel: &CancellationToken,
    ) -> Option<WorkRequest> {
        loop {
            let (generation, due) = {
                let state = self.lock();
                (
                    state.generation,
                    state.pending.as_ref().map(|r| (r.not_before, r.constraint)),
                )
            };

            let Some((not_before, constraint)) = due else {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = self.notify.notified() => {}
                }
                continue;
            };

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(not_before) => {}
            }

            if !constraint.is_met(connectivity.state()) {
                debug!("{} slot: waiting for network ({:?})", self.name, constraint);
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(CONSTRAINT_RECHECK) => {}
                }
                continue;
            }

            let mut state = self.lock();
            if state.generation == generation {
                return state.pending.take();
            }
        }
    }
}
