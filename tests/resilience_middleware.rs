//! Resilience middleware behaviour on protected routes.

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use office_gateway::config::{CircuitBreakerConfig, GatewayConfig, PresetName, RetryConfig};
use office_gateway::http::build_api_router;
use office_gateway::resilience::{MiddlewareOptions, ResilienceError};
use office_gateway::AppState;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

mod common;
use common::{get as get_req, install_policy, send, test_state};

fn no_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    }
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        ..RetryConfig::default()
    }
}

/// Handler answering 503 for the first `failures` calls, then 200.
fn flaky(calls: Arc<AtomicU32>, failures: u32) -> Router<AppState> {
    Router::new().route(
        "/api/{*rest}",
        any(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "down"}))).into_response()
                } else {
                    Json(json!({"call": n + 1})).into_response()
                }
            }
        }),
    )
}

#[tokio::test]
async fn test_read_preset_serves_second_request_from_cache() {
    let state = test_state(GatewayConfig::default());
    install_policy(&state, "/api/attendance", PresetName::HighFrequencyRead.options());
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(state.clone(), flaky(calls.clone(), 0));

    let first = send(&router, get_req("/api/attendance/today")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-resilience-cache"), Some("MISS"));
    assert_eq!(first.header("x-resilience-circuit-state"), Some("closed"));

    let second = send(&router, get_req("/api/attendance/today")).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-resilience-cache"), Some("HIT"));
    assert!(second.header("x-resilience-cache-time").is_some());
    assert_eq!(second.body, first.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // query string is part of the key
    let other = send(&router, get_req("/api/attendance/today?team=ops")).await;
    assert_eq!(other.header("x-resilience-cache"), Some("MISS"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.response_cache.len(), 2);
}

/// Handler counting calls and answering with a fixed response.
fn counted<F>(calls: Arc<AtomicU32>, answer: F) -> Router<AppState>
where
    F: Fn() -> axum::response::Response + Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api/{*rest}",
        get(move || {
            let calls = calls.clone();
            let answer = answer.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                answer()
            }
        }),
    )
}

#[tokio::test]
async fn test_oversized_answer_is_served_but_not_cached() {
    let mut config = GatewayConfig::default();
    config.security.max_body_size = 64;
    let state = test_state(config);
    install_policy(&state, "/api/attendance", PresetName::HighFrequencyRead.options());
    let calls = Arc::new(AtomicU32::new(0));
    let names: Vec<String> = (0..20).map(|i| format!("employee-{}", i)).collect();
    let router = build_api_router(
        state.clone(),
        counted(calls.clone(), move || Json(json!(names.clone())).into_response()),
    );

    for expected_calls in 1..=2 {
        let response = send(&router, get_req("/api/attendance/roster")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_array().map(Vec::len), Some(20));
        assert_eq!(response.header("x-resilience-cache"), Some("MISS"));
        assert_eq!(response.header("x-resilience-circuit-state"), Some("closed"));
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }
    assert!(state.response_cache.is_empty());
}

#[tokio::test]
async fn test_client_error_answer_is_not_cached() {
    let state = test_state(GatewayConfig::default());
    install_policy(&state, "/api/attendance", PresetName::HighFrequencyRead.options());
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(
        state.clone(),
        counted(calls.clone(), || {
            (StatusCode::NOT_FOUND, Json(json!({"error": "no record"}))).into_response()
        }),
    );

    for expected_calls in 1..=2 {
        let response = send(&router, get_req("/api/attendance/1999-01-01")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body["error"], "no record");
        assert_ne!(response.header("x-resilience-cache"), Some("HIT"));
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }
    assert!(state.response_cache.is_empty());
}

#[tokio::test]
async fn test_non_json_answer_is_served_but_not_cached() {
    let state = test_state(GatewayConfig::default());
    install_policy(&state, "/api/attendance", PresetName::HighFrequencyRead.options());
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(
        state.clone(),
        counted(calls.clone(), || "present: 12".into_response()),
    );

    for expected_calls in 1..=2 {
        let request = get_req("/api/attendance/summary.txt");
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-resilience-cache"], "MISS");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"present: 12");
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }
    assert!(state.response_cache.is_empty());
}

#[tokio::test]
async fn test_uncached_route_has_no_cache_header() {
    let state = test_state(GatewayConfig::default());
    install_policy(&state, "/api/payroll", PresetName::CriticalBusiness.options());
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(state.clone(), flaky(calls.clone(), 0));

    let response = send(&router, get_req("/api/payroll/run")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.header("x-resilience-cache").is_none());
    assert!(state.response_cache.is_empty());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let state = test_state(GatewayConfig::default());
    install_policy(
        &state,
        "/api/staff",
        MiddlewareOptions::from_defaults(CircuitBreakerConfig::default(), fast_retry(2)),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(state, flaky(calls.clone(), 2));

    let response = send(&router, get_req("/api/staff")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["call"], 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_pass_through_without_failure() {
    let state = test_state(GatewayConfig::default());
    install_policy(
        &state,
        "/api/staff",
        MiddlewareOptions::from_defaults(CircuitBreakerConfig::default(), fast_retry(3)),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    let protected = Router::new().route(
        "/api/staff/{id}",
        get(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                (StatusCode::NOT_FOUND, Json(json!({"error": "no such staff member"})))
            }
        }),
    );
    let router = build_api_router(state.clone(), protected);

    let response = send(&router, get_req("/api/staff/42")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let breaker = state
        .resilience
        .existing_circuit_breaker("api:/api/staff/42")
        .unwrap();
    assert_eq!(breaker.stats().failure_count, 0);
}

#[tokio::test]
async fn test_breaker_opens_and_rejects_without_calling_handler() {
    let state = test_state(GatewayConfig::default());
    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout_ms: 60_000,
        ..CircuitBreakerConfig::default()
    };
    install_policy(&state, "/api/leave", MiddlewareOptions::from_defaults(breaker, no_retry()));
    let calls = Arc::new(AtomicU32::new(0));
    let router = build_api_router(state, flaky(calls.clone(), u32::MAX));

    let first = send(&router, get_req("/api/leave")).await;
    assert_eq!(first.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(first.header("x-resilience-error"), Some("UpstreamError"));
    assert_eq!(first.header("x-resilience-circuit-state"), Some("closed"));

    let second = send(&router, get_req("/api/leave")).await;
    assert_eq!(second.header("x-resilience-circuit-state"), Some("open"));
    assert_eq!(second.body["circuit"], "api:/api/leave");

    let rejected = send(&router, get_req("/api/leave")).await;
    assert_eq!(rejected.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(rejected.header("x-resilience-error"), Some("CircuitOpenError"));
    assert_eq!(rejected.body["circuitState"], "OPEN");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_deadline_answers_408() {
    let state = test_state(GatewayConfig::default());
    let mut options = MiddlewareOptions::from_defaults(CircuitBreakerConfig::default(), no_retry());
    options.timeout = Some(Duration::from_millis(50));
    install_policy(&state, "/api/reports", options);

    let protected = Router::new().route(
        "/api/reports",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"late": true}))
        }),
    );
    let router = build_api_router(state, protected);

    let response = send(&router, get_req("/api/reports")).await;
    assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.header("x-resilience-error"), Some("TimeoutError"));
    assert_eq!(response.body["error"], "TimeoutError");
}

#[tokio::test]
async fn test_fallback_responder_replaces_error() {
    let state = test_state(GatewayConfig::default());
    let options = MiddlewareOptions::from_defaults(CircuitBreakerConfig::default(), no_retry())
        .with_fallback(Arc::new(|error: &ResilienceError| {
            Json(json!({"items": [], "degraded": true, "reason": error.name()})).into_response()
        }));
    install_policy(&state, "/api/announcements", options);
    let router = build_api_router(state, flaky(Arc::new(AtomicU32::new(0)), u32::MAX));

    let response = send(&router, get_req("/api/announcements")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["degraded"], true);
    assert_eq!(response.body["reason"], "UpstreamError");
    assert_eq!(response.header("x-resilience-circuit-state"), Some("closed"));
}

#[tokio::test]
async fn test_request_body_is_replayed_on_retry() {
    let state = test_state(GatewayConfig::default());
    install_policy(
        &state,
        "/api/tasks",
        MiddlewareOptions::from_defaults(CircuitBreakerConfig::default(), fast_retry(1)),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    let protected = Router::new().route(
        "/api/tasks",
        any(move |body: Bytes| {
            let counted = counted.clone();
            async move {
                if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                    return StatusCode::BAD_GATEWAY.into_response();
                }
                let received: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
                (StatusCode::CREATED, Json(json!({"received": received}))).into_response()
            }
        }),
    );
    let router = build_api_router(state, protected);

    let issued = common::issue_token(&router).await;
    let response = send(
        &router,
        issued.request("POST", "/api/tasks", r#"{"title":"Order toner"}"#),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["received"]["title"], "Order toner");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = GatewayConfig::default();
    config.security.max_body_size = 16;
    let state = test_state(config);
    let router = build_api_router(state, flaky(Arc::new(AtomicU32::new(0)), 0));

    let request = Request::builder()
        .uri("/api/upload")
        .body(Body::from(vec![b'x'; 1024]))
        .unwrap();
    let response = send(&router, request).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}
