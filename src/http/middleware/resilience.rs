//! Resilience middleware for protected routes.
//!
//! # Request Flow
//! ```text
//! request
//!   → options for path (routing::RoutePolicies)
//!   → GET/HEAD + caching enabled + cache hit? → cached response (HIT)
//!   → buffer body
//!   → execute_protected("api:" + path)
//!       → each attempt: rebuild request, run inner handler (optional deadline)
//!       → 5xx answers count as failures
//!   → Ok:  snapshot JSON answers < 400 into the response cache (MISS)
//!   → Err: fallback responder, else 500 / 408 JSON error
//!   → X-Resilience-Circuit-State on every non-cached answer
//! ```

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::cache::CachedResponse;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::error::{ResilienceError, ResilienceResult};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::race_deadline;
use crate::resilience::ProtectOptions;

pub const CACHE_HEADER: &str = "x-resilience-cache";
pub const CACHE_TIME_HEADER: &str = "x-resilience-cache-time";
pub const CIRCUIT_STATE_HEADER: &str = "x-resilience-circuit-state";
pub const ERROR_HEADER: &str = "x-resilience-error";

/// Headers never replayed from a cached snapshot.
const UNCACHED_HEADERS: [HeaderName; 5] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::SET_COOKIE,
    header::TRANSFER_ENCODING,
    header::DATE,
];

/// Breaker/metrics key for a request path.
pub fn circuit_name(path: &str) -> String {
    format!("api:{}", path)
}

pub async fn resilience_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let name = circuit_name(&path);
    let options = state.policies.resolve(&path);

    let method = request.method().clone();
    let cache_key = (options.caches_responses() && (method == Method::GET || method == Method::HEAD))
        .then(|| (options.cache_key)(&method, request.uri()));

    if let Some(key) = &cache_key {
        if let Some(entry) = state.response_cache.get_entry(key) {
            tracing::debug!(circuit = %name, cache_key = %key, "Response cache hit");
            metrics::record_response_cache("hit");
            let mut response = restore_snapshot(&entry.value);
            let headers = response.headers_mut();
            headers.insert(CACHE_HEADER, HeaderValue::from_static("HIT"));
            headers.insert(CACHE_TIME_HEADER, HeaderValue::from(entry.timestamp));
            return response;
        }
        metrics::record_response_cache("miss");
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.security.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(circuit = %name, error = %e, "Request body rejected");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({
                    "error": "Payload Too Large",
                    "message": "Request body exceeds the configured limit",
                })),
            )
                .into_response();
        }
    };

    let deadline = options.timeout;
    let protect = ProtectOptions::new()
        .circuit_breaker(options.circuit_breaker)
        .retry(RetryPolicy::new(options.retry));

    let result = state
        .resilience
        .execute_protected(
            &name,
            move || {
                let attempt = Request::from_parts(parts.clone(), Body::from(body.clone()));
                let next = next.clone();
                async move {
                    let call = async move { classify(next.run(attempt).await) };
                    match deadline {
                        Some(deadline) => race_deadline(deadline, call).await,
                        None => call.await,
                    }
                }
            },
            protect,
        )
        .await;

    let circuit_state = state
        .resilience
        .existing_circuit_breaker(&name)
        .map(|breaker| breaker.state())
        .unwrap_or(CircuitState::Closed);

    let mut response = match result {
        Ok(response) => match &cache_key {
            Some(key) => {
                let response = store_snapshot(&state, key, response, options.cache_ttl).await;
                with_header(response, CACHE_HEADER, HeaderValue::from_static("MISS"))
            }
            None => response,
        },
        Err(error) => match &options.fallback {
            Some(fallback) => {
                tracing::info!(circuit = %name, error = %error, "Serving fallback response");
                fallback(&error)
            }
            None => error_response(&name, circuit_state, &error),
        },
    };

    response.headers_mut().insert(
        CIRCUIT_STATE_HEADER,
        HeaderValue::from_static(circuit_state.header_value()),
    );
    response
}

/// 5xx answers are failures; everything else passes through.
fn classify(response: Response) -> ResilienceResult<Response> {
    let status = response.status();
    if status.is_server_error() {
        return Err(ResilienceError::Upstream {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Server Error").to_string(),
        });
    }
    Ok(response)
}

fn with_header(mut response: Response, name: &'static str, value: HeaderValue) -> Response {
    response.headers_mut().insert(name, value);
    response
}

/// Cache a JSON answer below 400. Non-JSON bodies, bodies of unknown
/// length and bodies over the buffer limit pass through uncached.
async fn store_snapshot(
    state: &AppState,
    key: &str,
    response: Response,
    ttl: Option<std::time::Duration>,
) -> Response {
    if response.status().as_u16() >= 400 {
        return response;
    }

    let limit = state.config.security.max_body_size;
    match response.body().size_hint().upper() {
        Some(len) if len <= limit as u64 => {}
        len => {
            tracing::debug!(cache_key = %key, body_len = ?len, "Response body not bufferable, not cached");
            return response;
        }
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(cache_key = %key, error = %e, "Failed to buffer response for caching");
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "error": "Bad Gateway",
                    "message": "Upstream response body could not be read",
                })),
            )
                .into_response();
        }
    };

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(json) => {
            state.response_cache.set(
                key.to_string(),
                CachedResponse {
                    status: parts.status.as_u16(),
                    headers: snapshot_headers(&parts.headers),
                    body: json,
                },
                ttl,
            );
            metrics::record_response_cache("store");
        }
        Err(_) => {
            tracing::debug!(cache_key = %key, "Response body is not JSON, not cached");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn snapshot_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !UNCACHED_HEADERS.contains(name))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn restore_snapshot(snapshot: &CachedResponse) -> Response {
    let body = serde_json::to_vec(&snapshot.body).unwrap_or_default();
    let mut response = Response::new(Body::from(Bytes::from(body)));
    *response.status_mut() = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::OK);

    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    response
}

/// Structured JSON error for an unrecovered failure.
pub fn error_response(circuit: &str, state: CircuitState, error: &ResilienceError) -> Response {
    let status = if error.is_timeout() {
        StatusCode::REQUEST_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    tracing::warn!(
        circuit = %circuit,
        state = %state,
        error = %error,
        status = status.as_u16(),
        "Protected request failed"
    );

    let mut response = (
        status,
        Json(serde_json::json!({
            "error": error.name(),
            "message": error.to_string(),
            "circuit": circuit,
            "circuitState": state,
        })),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(error.name()) {
        response.headers_mut().insert(ERROR_HEADER, value);
    }
    response
}
