//! Retry and timeout wrapper for network operations
//!
//! Every login, media upload and post creation goes through [`with_retry`].
//! Each attempt races the operation against a per-attempt timer; failures are
//! retried with capped exponential backoff until the attempt limit or the
//! total backoff budget is exhausted, at which point the last error is
//! returned unchanged.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::duration_serde;
use crate::error::{PlatformError, PlatformResult};

/// Bounds for retrying a single operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// How long a single attempt may run before it fails with a timeout
    #[serde(with = "duration_serde")]
    pub per_attempt_timeout: Duration,

    /// Backoff before the second attempt; doubled for each later attempt
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,

    /// Upper bound for a single backoff
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,

    /// Upper bound for the sum of all backoffs of one operation
    #[serde(with = "duration_serde")]
    pub max_retry_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            per_attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retry_time: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }
}

/// Run `op` with bounded retries and a per-attempt timeout
///
/// `label` names the operation in diagnostics (e.g. "mastodon login").
///
/// # Errors
///
/// Returns the error of the last attempt, unchanged, once retries are
/// exhausted. An attempt that outlives `policy.per_attempt_timeout` fails with
/// `PlatformError::Timeout` and its eventual result is discarded.
pub async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> PlatformResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PlatformResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut retry_time = Duration::ZERO;
    let mut attempt = 1;

    loop {
        let result = match timeout(policy.per_attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout {
                label: label.to_string(),
                after: policy.per_attempt_timeout,
            }),
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt >= max_attempts {
            warn!(
                "{} failed after {} attempts: {}",
                label, max_attempts, error
            );
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        if retry_time + delay > policy.max_retry_time {
            warn!(
                "{} failed on attempt {} and the retry budget of {} is spent: {}",
                label,
                attempt,
                humantime::format_duration(policy.max_retry_time),
                error
            );
            return Err(error);
        }

        warn!(
            attempt,
            max_attempts,
            label,
            error = %error,
            "Attempt {}/{} of {} failed. Retrying in {}...",
            attempt,
            max_attempts,
            label,
            humantime::format_duration(delay)
        );

        sleep(delay).await;
        retry_time += delay;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_starts_with_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_scales_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let calls = &AtomicU32::new(0);

        let result = with_retry("test op", &RetryPolicy::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PlatformError>("posted")
        })
        .await;

        assert_eq!(result, Ok("posted"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_attempt() {
        let calls = &AtomicU32::new(0);

        let result = with_retry("test op", &RetryPolicy::default(), move || async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 5 {
                Err(PlatformError::PostCreation(format!("attempt {}", attempt)))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error_unchanged() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: PlatformResult<()> = with_retry("test op", &RetryPolicy::default(), move || async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(PlatformError::MediaUpload(format!("attempt {}", attempt)))
        })
        .await;

        assert_eq!(result, Err(PlatformError::MediaUpload("attempt 5".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // 1s + 2s + 4s + 8s of backoff
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15));
        assert!(elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_stops_early() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retry_time: Duration::from_secs(5),
            ..RetryPolicy::default()
        };

        let result: PlatformResult<()> = with_retry("test op", &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PlatformError::PostCreation("still down".to_string()))
        })
        .await;

        assert!(result.is_err());
        // Backoffs of 1s and 2s fit the budget, the 4s one does not
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let calls = &AtomicU32::new(0);

        let result = with_retry("slow op", &RetryPolicy::default(), move || async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == 1 {
                sleep(Duration::from_secs(120)).await;
            }
            Ok::<_, PlatformError>(attempt)
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_when_every_attempt_hangs() {
        let policy = RetryPolicy {
            max_attempts: 2,
            per_attempt_timeout: Duration::from_secs(3),
            ..RetryPolicy::default()
        };

        let result: PlatformResult<()> = with_retry("hanging op", &policy, || async {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(PlatformError::Timeout {
                label: "hanging op".to_string(),
                after: Duration::from_secs(3),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_still_runs_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };

        let result: PlatformResult<()> = with_retry("test op", &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PlatformError::PostCreation("nope".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
