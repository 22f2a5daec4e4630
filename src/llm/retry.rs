use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::{CoreError, Result};

/// Exponential backoff for transient upstream model failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
    pub jitter_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2,
            jitter_ceiling: Duration::from_millis(1000),
        }
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay,
            max_delay: config.max_retry_delay,
            backoff_factor: config.retry_backoff_factor,
            jitter_ceiling: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), without jitter.
    fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(retry.min(31));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let ceiling = self.jitter_ceiling.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Whether an upstream failure message indicates a transient condition worth
/// retrying.
pub fn is_transient_message(message: &str) -> bool {
    message.contains("503")
        || message.contains("Service Unavailable")
        || message.contains("overloaded")
}

fn is_transient(error: &CoreError) -> bool {
    matches!(error, CoreError::ModelUpstreamTransient(_)) || is_transient_message(&error.to_string())
}

/// Runs `operation`, retrying transient failures with exponential backoff
/// plus uniform jitter; a small preventive delay of `min(100ms, D)` precedes
/// each retry. Exhausting the retry budget surfaces `ModelUpstreamFatal`;
/// non-transient errors pass through untouched on the first failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_transient(&error) {
            return Err(error);
        }
        if attempts > policy.max_retries {
            return Err(CoreError::ModelUpstreamFatal(format!(
                "giving up after {attempts} attempts: {error}"
            )));
        }

        let delay = policy.base_delay(attempts - 1) + policy.jitter();
        warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            %error,
            "transient upstream model error, retrying"
        );
        sleep(Duration::from_millis(100).min(delay)).await;
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_factor: 2,
            jitter_ceiling: Duration::ZERO,
        }
    }

    #[test]
    fn transient_markers_recognised() {
        assert!(is_transient_message("upstream returned 503"));
        assert!(is_transient_message("Service Unavailable"));
        assert!(is_transient_message("model is overloaded, try later"));
        assert!(!is_transient_message("invalid api key"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2,
            jitter_ceiling: Duration::ZERO,
        };

        assert_eq!(policy.base_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.base_delay(5), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn succeeds_after_k_transient_failures_with_k_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_policy(10), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CoreError::ModelUpstreamTransient("503".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_budget_makes_max_plus_one_attempts_and_fails_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry::<&str, _, _>(&fast_policy(3), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::ModelUpstreamTransient("overloaded".into()))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::ModelUpstreamFatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_transient_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry::<&str, _, _>(&fast_policy(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::internal("invalid api key"))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::Internal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
