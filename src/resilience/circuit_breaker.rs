//! Circuit breaker for protected operations.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: operation assumed down, calls fail fast
//! - Half-Open: a bounded number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: net failure_count >= failure_threshold,
//!                or rolling 60s error rate >= error_threshold_percentage
//!                (only once at least 10 samples are in the window)
//! Open → Half-Open: first call after reset_timeout since the last failure
//! Half-Open → Closed: half_open_max_calls successes
//! Half-Open → Open: any failure
//! ```
//!
//! A success in Closed decrements `failure_count` (never below zero) rather
//! than clearing it. Every transition resets the counters. Only
//! [`CircuitBreaker::reset`] forces Closed outside these rules.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::epoch_ms;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Width of the rolling error-rate window.
pub const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Samples required before the rolling error rate may open the breaker.
pub const MIN_ERROR_RATE_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Value of the `X-Resilience-Circuit-State` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub active_calls: u32,
    /// Error percentage over the rolling window.
    pub error_rate: f64,
    /// Unix epoch milliseconds of the most recent failure.
    pub last_failure_time: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct ErrorSample {
    at: Instant,
    errors: u32,
    total: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    active_calls: u32,
    last_failure: Option<Instant>,
    last_failure_epoch_ms: Option<u64>,
    samples: VecDeque<ErrorSample>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            active_calls: 0,
            last_failure: None,
            last_failure_epoch_ms: None,
            samples: VecDeque::new(),
        }
    }

    fn record_sample(&mut self, now: Instant, is_error: bool) {
        self.samples.push_back(ErrorSample {
            at: now,
            errors: u32::from(is_error),
            total: 1,
        });
        self.prune_samples(now);
    }

    fn prune_samples(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > ERROR_RATE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> f64 {
        let (errors, total) = self
            .samples
            .iter()
            .fold((0u64, 0u64), |(e, t), s| (e + s.errors as u64, t + s.total as u64));
        if total == 0 {
            return 0.0;
        }
        errors as f64 / total as f64 * 100.0
    }

    fn rate_exceeded(&self, threshold: f64) -> bool {
        self.samples.len() >= MIN_ERROR_RATE_SAMPLES && self.error_rate() >= threshold
    }
}

/// Per-operation circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejects with [`ResilienceError::CircuitOpen`] or
    /// [`ResilienceError::CircuitSaturated`] without invoking the operation
    /// when the gate is closed; otherwise returns the operation's own result.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let _guard = self.admit()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        inner.prune_samples(Instant::now());
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            active_calls: inner.active_calls,
            error_rate: inner.error_rate(),
            last_failure_time: inner.last_failure_epoch_ms,
        }
    }

    /// Force Closed with zeroed counters and an empty error window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.last_failure_epoch_ms = None;
        inner.samples.clear();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn admit(&self) -> Result<ActiveCallGuard<'_>, ResilienceError> {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let reset_timeout = Duration::from_millis(self.config.reset_timeout_ms);
            let cooled_down = inner
                .last_failure
                .map(|at| now.duration_since(at) >= reset_timeout)
                .unwrap_or(true);

            if !cooled_down {
                metrics::record_circuit_rejection(&self.name);
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        if inner.state == CircuitState::HalfOpen
            && inner.active_calls >= self.config.half_open_max_calls
        {
            metrics::record_circuit_rejection(&self.name);
            return Err(ResilienceError::CircuitSaturated {
                name: self.name.clone(),
            });
        }

        inner.active_calls += 1;
        Ok(ActiveCallGuard { breaker: self })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.record_sample(now, false);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
                if inner.rate_exceeded(self.config.error_threshold_percentage) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_failure = Some(now);
        inner.last_failure_epoch_ms = Some(epoch_ms());
        inner.record_sample(now, true);

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold
                    || inner.rate_exceeded(self.config.error_threshold_percentage)
                {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;

        match to {
            CircuitState::Open => {
                tracing::warn!(
                    circuit = %self.name,
                    from = %from,
                    error_rate = inner.error_rate(),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, "Circuit breaker half-open, probing");
            }
            CircuitState::Closed => {
                inner.samples.clear();
                tracing::info!(circuit = %self.name, "Circuit breaker closed, operation recovered");
            }
        }
        metrics::record_circuit_transition(&self.name, to);
    }
}

/// Releases the breaker's active-call slot on drop, including when the
/// caller's future is cancelled mid-flight.
struct ActiveCallGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ActiveCallGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        inner.active_calls = inner.active_calls.saturating_sub(1);
    }
}
