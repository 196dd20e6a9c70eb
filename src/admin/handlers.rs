use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Environment;
use crate::http::server::AppState;
use crate::resilience::cache::CacheStats;
use crate::resilience::circuit_breaker::CircuitBreakerStats;
use crate::resilience::metrics::MetricReading;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub environment: Environment,
    pub upstream: String,
    pub route_policies: usize,
    pub csrf_tokens: usize,
}

/// Diagnostics surface for dashboards and the CLI.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceReport {
    /// Milliseconds since startup.
    pub uptime: u64,
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStats>,
    /// Response cache.
    pub cache_stats: CacheStats,
    pub value_cache_size: usize,
    pub metrics: BTreeMap<String, MetricReading>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCleared {
    pub response_cache: usize,
    pub value_cache: usize,
}

#[derive(Serialize)]
pub struct BreakersReset {
    pub reset: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(GatewayStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        environment: state.config.environment,
        upstream: state.upstream.authority().to_string(),
        route_policies: state.policies.len(),
        csrf_tokens: state.csrf.len(),
    })
}

pub async fn get_resilience(State(state): State<AppState>) -> Json<ResilienceReport> {
    let status = state.resilience.system_status();
    Json(ResilienceReport {
        uptime: status.uptime,
        circuit_breakers: status.circuit_breakers,
        cache_stats: state.response_cache.stats(),
        value_cache_size: status.cache_size,
        metrics: status.metrics,
    })
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheCleared> {
    let cleared = CacheCleared {
        response_cache: state.response_cache.len(),
        value_cache: state.resilience.cache().len(),
    };
    state.response_cache.clear();
    state.resilience.clear_cache();
    tracing::info!(
        response_cache = cleared.response_cache,
        value_cache = cleared.value_cache,
        "Caches cleared via admin API"
    );
    Json(cleared)
}

pub async fn reset_breakers(State(state): State<AppState>) -> Json<BreakersReset> {
    Json(BreakersReset {
        reset: state.resilience.reset_all_circuit_breakers(),
    })
}
