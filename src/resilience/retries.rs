//! Retry logic.
//!
//! An operation is attempted up to `max_retries + 1` times. Before each
//! retry (never before the first attempt) the executor sleeps for the
//! backoff delay. The loop stops early when no retry predicate accepts the
//! last error; after the final attempt the last error is returned.

use std::future::Future;
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Classifies an error as worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Retry everything except programming errors.
pub fn default_retryable(error: &ResilienceError) -> bool {
    !error.is_programming_error()
}

/// Like [`default_retryable`], but 4xx upstream answers are final.
pub fn retryable_except_client_errors(error: &ResilienceError) -> bool {
    default_retryable(error)
        && !matches!(error.upstream_status(), Some(status) if (400..500).contains(&status))
}

/// Backoff settings plus the predicates deciding what is retryable.
#[derive(Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    retryable_errors: Vec<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retryable_errors: vec![Arc::new(default_retryable)],
        }
    }

    /// Replace the default predicate list. An error is retried when any
    /// predicate accepts it.
    pub fn with_predicates(config: RetryConfig, predicates: Vec<RetryPredicate>) -> Self {
        Self {
            config,
            retryable_errors: predicates,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }

    pub fn is_retryable(&self, error: &ResilienceError) -> bool {
        self.retryable_errors.iter().any(|p| p(error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("predicates", &self.retryable_errors.len())
            .finish()
    }
}

/// Run `operation` under `policy`, retrying with backoff.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> ResilienceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ResilienceResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.config.max_retries {
                    tracing::debug!(operation = %operation_name, attempts = attempt + 1, error = %e, "Retries exhausted");
                    return Err(e);
                }
                if !policy.is_retryable(&e) {
                    tracing::debug!(operation = %operation_name, error = %e, "Error not retryable");
                    return Err(e);
                }

                attempt += 1;
                let delay = calculate_backoff(attempt, &policy.config);
                tracing::info!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay = ?delay,
                    error = %e,
                    "Retrying operation"
                );
                metrics::record_retry(operation_name);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_invoked_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let result: ResilienceResult<()> = with_retry("op", &policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ResilienceError::Transient("down".into())) }
        })
        .await;

        assert_eq!(result.unwrap_err(), ResilienceError::Transient("down".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", &policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ResilienceError::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_are_applied() {
        let start = tokio::time::Instant::now();
        let _: ResilienceResult<()> = with_retry("op", &policy(3), || async {
            Err(ResilienceError::Transient("down".into()))
        })
        .await;

        // 100 + 200 + 400
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_programming_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ResilienceResult<()> = with_retry("op", &policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ResilienceError::InvalidArgument("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_predicate() {
        let policy = RetryPolicy::with_predicates(
            RetryConfig {
                max_retries: 3,
                initial_delay_ms: 0,
                ..RetryConfig::default()
            },
            vec![Arc::new(retryable_except_client_errors)],
        );
        let calls = AtomicU32::new(0);
        let _: ResilienceResult<()> = with_retry("op", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ResilienceError::Upstream {
                    status: 404,
                    message: "missing".into(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(policy.is_retryable(&ResilienceError::Upstream {
            status: 503,
            message: String::new()
        }));
    }
}
