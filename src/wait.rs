//! Bounded polling with cancellation support.
//!
//! Waiters poll at a fixed interval up to an attempt ceiling. They are the
//! only long-lived operations of a run and stop as soon as the run's
//! cancellation token fires.

use crate::error::NukeError;
use backon::{BackoffBuilder, ConstantBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed-interval polling configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Delay between two checks
    pub interval: Duration,
    /// Maximum number of checks before giving up
    pub max_attempts: usize,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

impl WaitConfig {
    pub fn new(interval: Duration, max_attempts: usize) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Poll `check` until it reports `true`.
///
/// Returns [`NukeError::Timeout`] once `max_attempts` checks came back
/// `false`, [`NukeError::Cancelled`] if the token fires, or the classified
/// check error.
pub async fn poll_until<F, Fut>(
    config: WaitConfig,
    cancel: &CancellationToken,
    what: &str,
    check: F,
) -> Result<(), NukeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delays = ConstantBuilder::default()
        .with_delay(config.interval)
        .with_max_times(max_attempts - 1)
        .build();
    let mut attempts = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(NukeError::Cancelled);
        }

        attempts += 1;
        match check().await {
            Ok(true) => {
                debug!(what = %what, attempts, "Wait condition met");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                warn!(what = %what, error = %e, "Wait check failed");
                return Err(NukeError::from_anyhow(&e));
            }
        }

        let Some(delay) = delays.next() else {
            return Err(NukeError::Timeout {
                type_name: what.to_string(),
                attempts,
            });
        };

        debug!(what = %what, attempt = attempts, delay_ms = delay.as_millis(), "Not done, polling again");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(NukeError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: usize) -> WaitConfig {
        WaitConfig::new(Duration::from_millis(5), max_attempts)
    }

    #[tokio::test]
    async fn succeeds_after_a_few_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let result = poll_until(fast(10), &cancel, "disk", || {
            let c = counter.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_attempt_ceiling() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let result = poll_until(fast(4), &cancel, "disk", || {
            let c = counter.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        })
        .await;

        assert_eq!(
            result,
            Err(NukeError::Timeout {
                type_name: "disk".to_string(),
                attempts: 4
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let config = WaitConfig::new(Duration::from_secs(30), 100);
        let result = poll_until(config, &cancel, "cluster", || async { Ok(false) }).await;
        assert_eq!(result, Err(NukeError::Cancelled));
    }

    #[tokio::test]
    async fn check_error_is_returned() {
        let cancel = CancellationToken::new();
        let result = poll_until(fast(3), &cancel, "bucket", || async {
            anyhow::bail!("check failed")
        })
        .await;
        assert_eq!(result, Err(NukeError::Other("check failed".to_string())));
    }
}
