//! Bounded exponential retry for network calls.
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::app::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2,
        }
    }
}

/// Runs `op` up to `policy.attempts` times, sleeping between failures.
///
/// Cancellation is checked before every attempt and every wait; a cancelled token
/// yields `SyncError::Cancelled` instead of the last error.
pub async fn retry_io<T, F, Fut>(
    description: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if attempt > 1 {
            debug!("Retrying {} (attempt {})", description, attempt);
        }

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if attempt >= attempts {
            return Err(error);
        }
        warn!("failed call({}): {}: {}", attempt, description, error);

        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * policy.factor).min(policy.max_delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result = retry_io("flaky", RetryPolicy::default(), &cancel, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::Other("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result: Result<()> = retry_io("down", RetryPolicy::default(), &cancel, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Other("boom".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Other(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once_and_returns_its_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy {
            attempts: 0,
            ..RetryPolicy::default()
        };

        let result: Result<()> = retry_io("once", policy, &CancellationToken::new(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Parse("bad".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let _: Result<()> = retry_io("slow", policy, &cancel, || async {
            Err(SyncError::Other("boom".into()))
        })
        .await;

        // 200 + 400 + 800 + 1600 ms between five attempts
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_caps_wait() {
        let policy = RetryPolicy {
            attempts: 4,
            initial_delay: Duration::from_millis(1500),
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let _: Result<()> = retry_io("slow", policy, &cancel, || async {
            Err(SyncError::Other("boom".into()))
        })
        .await;

        // 1500 + 2000 + 2000 ms
        assert_eq!(start.elapsed(), Duration::from_millis(5500));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_io("never", RetryPolicy::default(), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_io("cancel", RetryPolicy::default(), &cancel, || {
            let counter = counter.clone();
            let trigger = trigger.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                trigger.cancel();
                Err(SyncError::Other("boom".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
