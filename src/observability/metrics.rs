//! Metrics export.
//!
//! # Metrics
//! - `gateway_operations_total` (counter): protected operations by name, outcome
//! - `gateway_operation_duration_seconds` (histogram): protected operation latency
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by target state
//! - `gateway_circuit_rejections_total` (counter): calls refused by a breaker
//! - `gateway_response_cache_total` (counter): response cache hit/miss/store
//! - `gateway_retries_total` (counter): retry attempts by operation
//! - `gateway_csrf_validations_total` (counter): CSRF checks by result
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!("gateway_operations_total", "Protected operations by outcome");
    describe_histogram!(
        "gateway_operation_duration_seconds",
        "Protected operation duration in seconds"
    );
    describe_counter!(
        "gateway_circuit_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "gateway_circuit_rejections_total",
        "Calls rejected by an open or saturated breaker"
    );
    describe_counter!("gateway_response_cache_total", "Response cache lookups and stores");
    describe_counter!("gateway_retries_total", "Retry attempts");
    describe_counter!("gateway_csrf_validations_total", "CSRF token validations");
}

pub fn record_operation(operation: &str, is_error: bool, elapsed: Duration) {
    let outcome = if is_error { "error" } else { "success" };
    counter!(
        "gateway_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_circuit_transition(circuit: &str, to: CircuitState) {
    counter!(
        "gateway_circuit_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to.header_value()
    )
    .increment(1);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!(
        "gateway_circuit_rejections_total",
        "circuit" => circuit.to_string()
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!("gateway_retries_total", "operation" => operation.to_string()).increment(1);
}

/// `result` is one of `hit`, `miss`, `store`.
pub fn record_response_cache(result: &'static str) {
    counter!("gateway_response_cache_total", "result" => result).increment(1);
}

pub fn record_csrf_validation(valid: bool) {
    let result = if valid { "valid" } else { "rejected" };
    counter!("gateway_csrf_validations_total", "result" => result).increment(1);
}
