//! Middleware configuration bundles.
//!
//! The four presets share one algorithm and differ only in their numbers.
//! A route policy starts from a preset and overrides individual fields.

use axum::http::{Method, Uri};
use axum::response::Response;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CircuitBreakerConfig, PresetName, RetryConfig, RoutePolicyConfig};
use crate::resilience::error::ResilienceError;

/// Derives the response-cache key for a request.
pub type CacheKeyFn = fn(&Method, &Uri) -> String;

/// Produces the response served when a protected request fails for good.
pub type FallbackResponder = Arc<dyn Fn(&ResilienceError) -> Response + Send + Sync>;

/// `METHOD path?query`.
pub fn default_cache_key(method: &Method, uri: &Uri) -> String {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{} {}", method, path)
}

/// Resolved resilience options for one route.
#[derive(Clone)]
pub struct MiddlewareOptions {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Per-attempt deadline for the wrapped handler.
    pub timeout: Option<Duration>,
    /// Response cache TTL; `None` disables response caching.
    pub cache_ttl: Option<Duration>,
    pub cache_key: CacheKeyFn,
    pub fallback: Option<FallbackResponder>,
}

impl MiddlewareOptions {
    /// Options for routes with no matching policy.
    pub fn from_defaults(circuit_breaker: CircuitBreakerConfig, retry: RetryConfig) -> Self {
        Self {
            circuit_breaker,
            retry,
            timeout: None,
            cache_ttl: None,
            cache_key: default_cache_key,
            fallback: None,
        }
    }

    /// Preset numbers with the policy's overrides applied.
    pub fn from_policy(policy: &RoutePolicyConfig) -> Self {
        let mut options = policy.preset.options();

        if let Some(ms) = policy.timeout_ms {
            options.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = policy.cache_ttl_ms {
            options.cache_ttl = Some(Duration::from_millis(ms));
        }
        if policy.cache_enabled == Some(false) {
            options.cache_ttl = None;
        }
        if let Some(cb) = policy.circuit_breaker {
            options.circuit_breaker = cb;
        }
        if let Some(retry) = policy.retry {
            options.retry = retry;
        }
        options
    }

    pub fn with_fallback(mut self, fallback: FallbackResponder) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_cache_key(mut self, cache_key: CacheKeyFn) -> Self {
        self.cache_key = cache_key;
        self
    }

    pub fn caches_responses(&self) -> bool {
        self.cache_ttl.is_some()
    }
}

impl fmt::Debug for MiddlewareOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareOptions")
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl PresetName {
    pub fn options(self) -> MiddlewareOptions {
        match self {
            // Dashboards and lists polled constantly: cache hard, fail fast.
            PresetName::HighFrequencyRead => MiddlewareOptions {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 10,
                    reset_timeout_ms: 10_000,
                    half_open_max_calls: 5,
                    error_threshold_percentage: 60.0,
                },
                retry: RetryConfig {
                    max_retries: 2,
                    initial_delay_ms: 50,
                    max_delay_ms: 500,
                    backoff_multiplier: 2.0,
                    jitter_ratio: 0.0,
                },
                timeout: Some(Duration::from_secs(5)),
                cache_ttl: Some(Duration::from_secs(30)),
                cache_key: default_cache_key,
                fallback: None,
            },
            PresetName::DataWrite => MiddlewareOptions {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 5,
                    reset_timeout_ms: 30_000,
                    half_open_max_calls: 2,
                    error_threshold_percentage: 50.0,
                },
                retry: RetryConfig {
                    max_retries: 1,
                    initial_delay_ms: 200,
                    max_delay_ms: 1_000,
                    backoff_multiplier: 2.0,
                    jitter_ratio: 0.0,
                },
                timeout: Some(Duration::from_secs(10)),
                cache_ttl: None,
                cache_key: default_cache_key,
                fallback: None,
            },
            PresetName::ThirdPartyApi => MiddlewareOptions {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 3,
                    reset_timeout_ms: 60_000,
                    half_open_max_calls: 1,
                    error_threshold_percentage: 30.0,
                },
                retry: RetryConfig {
                    max_retries: 3,
                    initial_delay_ms: 500,
                    max_delay_ms: 10_000,
                    backoff_multiplier: 2.0,
                    jitter_ratio: 0.2,
                },
                timeout: Some(Duration::from_secs(15)),
                cache_ttl: Some(Duration::from_secs(5 * 60)),
                cache_key: default_cache_key,
                fallback: None,
            },
            PresetName::CriticalBusiness => MiddlewareOptions {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 3,
                    reset_timeout_ms: 15_000,
                    half_open_max_calls: 3,
                    error_threshold_percentage: 25.0,
                },
                retry: RetryConfig {
                    max_retries: 5,
                    initial_delay_ms: 100,
                    max_delay_ms: 5_000,
                    backoff_multiplier: 2.0,
                    jitter_ratio: 0.0,
                },
                timeout: Some(Duration::from_secs(30)),
                cache_ttl: None,
                cache_key: default_cache_key,
                fallback: None,
            },
        }
    }
}
