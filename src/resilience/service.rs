//! Resilience orchestrator.
//!
//! [`ResilienceService::execute_protected`] composes the value cache,
//! circuit breaker, retry executor, metrics and fallback:
//!
//! ```text
//! cache hit? ──yes──▶ return cached value (nothing else engaged)
//!     │ no
//!     ▼
//! metrics timer → breaker(name) → retry(policy) → operation
//!     │
//!     ├─ Ok  → cache (if keyed) → success sample → value
//!     └─ Err → failure sample → fallback? ─ok─▶ cache (if keyed) → value
//!                                   └─err/none─▶ original error
//! ```

use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::resilience::cache::{CacheEntry, ValueCache};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::resilience::error::{ResilienceError, ResilienceResult};
use crate::resilience::metrics::{MetricReading, MetricsCollector};
use crate::resilience::retries::{self, RetryPolicy};
use crate::resilience::store::{MemoryStore, SharedStore};

type FallbackPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;
type FallbackProducer<T> = Arc<dyn Fn() -> BoxFuture<'static, ResilienceResult<T>> + Send + Sync>;

/// Substitute result path for failed operations.
pub struct Fallback<T> {
    should_fallback: FallbackPredicate,
    get_fallback_value: FallbackProducer<T>,
}

impl<T> Fallback<T> {
    pub fn new<P, G, Fut>(should_fallback: P, get_fallback_value: G) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
        G: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    {
        Self {
            should_fallback: Arc::new(should_fallback),
            get_fallback_value: Arc::new(move || get_fallback_value().boxed()),
        }
    }

    /// Fall back on every error.
    pub fn always<G, Fut>(get_fallback_value: G) -> Self
    where
        G: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    {
        Self::new(|_| true, get_fallback_value)
    }
}

impl<T> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self {
            should_fallback: self.should_fallback.clone(),
            get_fallback_value: self.get_fallback_value.clone(),
        }
    }
}

struct CacheSpec<T> {
    key: String,
    encode: fn(&T) -> Option<serde_json::Value>,
    decode: fn(serde_json::Value) -> Option<T>,
}

fn encode_json<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

fn decode_json<T: DeserializeOwned>(value: serde_json::Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

/// Per-call options for [`ResilienceService::execute_protected`].
pub struct ProtectOptions<T> {
    circuit_breaker: Option<CircuitBreakerConfig>,
    retry: Option<RetryPolicy>,
    fallback: Option<Fallback<T>>,
    cache: Option<CacheSpec<T>>,
    cache_ttl: Option<Duration>,
}

impl<T> Default for ProtectOptions<T> {
    fn default() -> Self {
        Self {
            circuit_breaker: None,
            retry: None,
            fallback: None,
            cache: None,
            cache_ttl: None,
        }
    }
}

impl<T> ProtectOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker thresholds, used only if this call creates the breaker.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn fallback(mut self, fallback: Fallback<T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

impl<T> ProtectOptions<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Cache successful (and fallback) results under `key`.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache = Some(CacheSpec {
            key: key.into(),
            encode: encode_json::<T>,
            decode: decode_json::<T>,
        });
        self
    }
}

/// Aggregate read-only status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStats>,
    pub metrics: BTreeMap<String, MetricReading>,
    pub cache_size: usize,
    /// Milliseconds since the service was created.
    pub uptime: u64,
}

/// Composes breaker, retry, cache, fallback and metrics.
pub struct ResilienceService {
    breakers: SharedStore<Arc<CircuitBreaker>>,
    cache: ValueCache,
    metrics: MetricsCollector,
    defaults: ResilienceConfig,
    started_at: Instant,
}

impl ResilienceService {
    /// Service over in-memory stores.
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self::with_stores(
            defaults,
            MemoryStore::shared(),
            MemoryStore::shared(),
            MemoryStore::shared(),
        )
    }

    pub fn with_stores(
        defaults: ResilienceConfig,
        breakers: SharedStore<Arc<CircuitBreaker>>,
        cache: SharedStore<CacheEntry<serde_json::Value>>,
        metrics: SharedStore<Arc<std::sync::Mutex<crate::resilience::metrics::MetricRecord>>>,
    ) -> Self {
        let cache_ttl = Duration::from_millis(defaults.cache_ttl_ms);
        let idle_window = Duration::from_secs(defaults.metrics_idle_secs);
        Self {
            breakers,
            cache: ValueCache::with_store(cache, cache_ttl),
            metrics: MetricsCollector::with_store(metrics, idle_window),
            defaults,
            started_at: Instant::now(),
        }
    }

    pub fn defaults(&self) -> &ResilienceConfig {
        &self.defaults
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Breaker for `name`, created on first reference.
    ///
    /// `config` only applies when the breaker does not exist yet.
    pub fn circuit_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        self.breakers.get_or_insert_with(name, &mut || {
            let config = config.unwrap_or(self.defaults.circuit_breaker);
            tracing::debug!(circuit = %name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        })
    }

    /// Breaker for `name` if one exists.
    pub fn existing_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name)
    }

    /// Run `operation` under the named breaker with retry, caching,
    /// metrics and fallback as configured in `options`.
    pub async fn execute_protected<T, F, Fut>(
        &self,
        name: &str,
        operation: F,
        options: ProtectOptions<T>,
    ) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        if let Some(spec) = &options.cache {
            if let Some(value) = self.cache.get(&spec.key).and_then(spec.decode) {
                tracing::debug!(operation = %name, cache_key = %spec.key, "Value cache hit");
                return Ok(value);
            }
        }

        let breaker = self.circuit_breaker(name, options.circuit_breaker);
        let policy = options
            .retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::new(self.defaults.retry));

        let start = self.metrics.start_operation(name);
        let outcome = breaker
            .execute(|| retries::with_retry(name, &policy, operation))
            .await;

        match outcome {
            Ok(value) => {
                self.store_cached(&options, &value);
                self.metrics.end_operation(name, start, false);
                Ok(value)
            }
            Err(error) => {
                self.metrics.end_operation(name, start, true);

                if let Some(fallback) = &options.fallback {
                    if (fallback.should_fallback)(&error) {
                        match (fallback.get_fallback_value)().await {
                            Ok(value) => {
                                tracing::info!(operation = %name, error = %error, "Serving fallback value");
                                self.store_cached(&options, &value);
                                return Ok(value);
                            }
                            Err(fallback_error) => {
                                tracing::warn!(
                                    operation = %name,
                                    error = %error,
                                    fallback_error = %fallback_error,
                                    "Fallback failed"
                                );
                            }
                        }
                    }
                }

                Err(error)
            }
        }
    }

    fn store_cached<T>(&self, options: &ProtectOptions<T>, value: &T) {
        if let Some(spec) = &options.cache {
            match (spec.encode)(value) {
                Some(encoded) => self.cache.set(spec.key.clone(), encoded, options.cache_ttl),
                None => {
                    tracing::debug!(cache_key = %spec.key, "Result not serializable, skipping cache")
                }
            }
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        let circuit_breakers = self
            .breakers
            .entries()
            .into_iter()
            .map(|(name, breaker)| (name, breaker.stats()))
            .collect();

        SystemStatus {
            circuit_breakers,
            metrics: self.metrics.all(),
            cache_size: self.cache.len(),
            uptime: self.started_at.elapsed().as_millis() as u64,
        }
    }

    /// Force every breaker to Closed with zeroed counters.
    pub fn reset_all_circuit_breakers(&self) -> usize {
        let breakers = self.breakers.entries();
        for (_, breaker) in &breakers {
            breaker.reset();
        }
        tracing::info!(count = breakers.len(), "All circuit breakers reset");
        breakers.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Value cache cleared");
    }

    /// Prune expired cache entries and idle metric records.
    pub fn run_maintenance(&self) -> (usize, usize) {
        (self.cache.prune(), self.metrics.cleanup())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service() -> ResilienceService {
        ResilienceService::new(ResilienceConfig {
            retry: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
            ..ResilienceConfig::default()
        })
    }

    #[tokio::test]
    async fn test_cache_key_invokes_operation_once() {
        let svc = service();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value = svc
                .execute_protected(
                    "users",
                    || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(vec![format!("user-{}", n)]) }
                    },
                    ProtectOptions::new().cache_key("users:list"),
                )
                .await
                .unwrap();
            assert_eq!(value, vec!["user-0".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.metrics().get_metrics("users").unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_expires_with_ttl() {
        let svc = service();
        let calls = AtomicU32::new(0);
        let run = || {
            svc.execute_protected(
                "ttl",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1u8) }
                },
                ProtectOptions::new()
                    .cache_key("ttl")
                    .cache_ttl(Duration::from_secs(5)),
            )
        };

        run().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_inside_breaker() {
        let svc = service();
        let calls = AtomicU32::new(0);
        let result: ResilienceResult<()> = svc
            .execute_protected(
                "retrying",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ResilienceError::Transient("down".into())) }
                },
                ProtectOptions::new().retry(RetryPolicy::new(RetryConfig {
                    max_retries: 2,
                    initial_delay_ms: 10,
                    ..RetryConfig::default()
                })),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // one breaker call for the whole retry sequence
        let stats = svc.circuit_breaker("retrying", None).stats();
        assert_eq!(stats.failure_count, 1);
    }

    #[tokio::test]
    async fn test_fallback_value_is_served_and_cached() {
        let svc = service();
        let value = svc
            .execute_protected(
                "inventory",
                || async { Err::<u32, _>(ResilienceError::Transient("down".into())) },
                ProtectOptions::new()
                    .cache_key("inventory:count")
                    .fallback(Fallback::always(|| async { Ok(42) })),
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(svc.cache().get("inventory:count"), Some(serde_json::json!(42)));
        assert_eq!(svc.metrics().get_metrics("inventory").unwrap().error_rate, 100.0);
    }

    #[tokio::test]
    async fn test_failed_fallback_rethrows_original_error() {
        let svc = service();
        let err = svc
            .execute_protected(
                "approvals",
                || async { Err::<u32, _>(ResilienceError::Transient("primary".into())) },
                ProtectOptions::new().fallback(Fallback::always(|| async {
                    Err(ResilienceError::Transient("fallback".into()))
                })),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ResilienceError::Transient("primary".into()));
    }

    #[tokio::test]
    async fn test_fallback_predicate_is_respected() {
        let svc = service();
        let err = svc
            .execute_protected(
                "cashier",
                || async { Err::<u32, _>(ResilienceError::InvalidArgument("bad".into())) },
                ProtectOptions::new().fallback(Fallback::new(
                    |e: &ResilienceError| e.is_breaker_rejection(),
                    || async { Ok(0) },
                )),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ResilienceError::InvalidArgument("bad".into()));
    }

    #[tokio::test]
    async fn test_breaker_rejection_falls_back() {
        let svc = service();
        let cfg = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 60_000,
            half_open_max_calls: 1,
            error_threshold_percentage: 100.0,
        };
        let _ = svc
            .execute_protected(
                "schedule",
                || async { Err::<u32, _>(ResilienceError::Transient("down".into())) },
                ProtectOptions::new().circuit_breaker(cfg),
            )
            .await;
        assert_eq!(svc.circuit_breaker("schedule", None).state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let value = svc
            .execute_protected(
                "schedule",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1) }
                },
                ProtectOptions::new().fallback(Fallback::new(
                    |e: &ResilienceError| e.is_breaker_rejection(),
                    || async { Ok(99) },
                )),
            )
            .await
            .unwrap();

        assert_eq!(value, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_and_admin_operations() {
        let svc = service();
        let _ = svc
            .execute_protected(
                "messages",
                || async { Ok::<_, ResilienceError>("hi".to_string()) },
                ProtectOptions::new().cache_key("messages:latest"),
            )
            .await;

        let status = svc.system_status();
        assert!(status.circuit_breakers.contains_key("messages"));
        assert!(matches!(
            status.metrics.get("messages"),
            Some(MetricReading::Recorded(_))
        ));
        assert_eq!(status.cache_size, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("circuitBreakers").is_some());
        assert!(json.get("cacheSize").is_some());

        svc.clear_cache();
        assert_eq!(svc.system_status().cache_size, 0);

        assert_eq!(svc.reset_all_circuit_breakers(), 1);
        assert_eq!(
            svc.circuit_breaker("messages", None).state(),
            CircuitState::Closed
        );
    }
}
