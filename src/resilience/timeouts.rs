//! Timeout enforcement.
//!
//! The deadline races the operation; it does not cancel it. The operation
//! runs as its own task, and when the deadline wins the task keeps running
//! in the background and its result is discarded. A timeout surfaces as
//! [`ResilienceError::Timeout`] and is accounted like any other failure.

use std::future::Future;
use std::time::Duration;

use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Race `operation` against `deadline`.
pub async fn race_deadline<T, Fut>(deadline: Duration, operation: Fut) -> ResilienceResult<T>
where
    Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ResilienceError::Internal(format!(
            "protected task failed: {}",
            join_error
        ))),
        Err(_) => {
            tracing::debug!(deadline = ?deadline, "Deadline elapsed, leaving operation detached");
            Err(ResilienceError::Timeout {
                after_ms: deadline.as_millis() as u64,
            })
        }
    }
}
