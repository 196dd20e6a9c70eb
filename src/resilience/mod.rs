//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! execute_protected(name, op):
//!     → cache.rs (value cache, short-circuits on hit)
//!     → circuit_breaker.rs (per-name gate, fail fast when open)
//!     → retries.rs + backoff.rs (re-run op on retryable errors)
//!     → metrics.rs (count, error rate, latency per name)
//!     → fallback (optional substitute value)
//!
//! HTTP requests:
//!     → presets.rs (per-route options)
//!     → http::middleware::resilience (response cache, timeouts.rs, breaker, retry)
//! ```
//!
//! All shared state lives behind [`store::KeyValueStore`] so a different
//! backing store can be injected.

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod metrics;
pub mod presets;
pub mod retries;
pub mod service;
pub mod store;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use error::{ResilienceError, ResilienceResult};
pub use presets::MiddlewareOptions;
pub use service::{Fallback, ProtectOptions, ResilienceService, SystemStatus};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock Unix epoch milliseconds.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
