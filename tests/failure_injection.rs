//! End-to-end failure injection through a real listener and upstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use office_gateway::config::{GatewayConfig, PresetName, RetryConfig, RoutePolicyConfig};
use office_gateway::{AppState, HttpServer, Shutdown};
use tokio::net::TcpListener;

mod common;

async fn start_gateway(config: GatewayConfig) -> (String, Shutdown, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(AppState::new(config).unwrap());
    let signal = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });
    (format!("http://{}", addr), shutdown, handle)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

fn route(prefix: &str, preset: PresetName) -> RoutePolicyConfig {
    RoutePolicyConfig {
        path_prefix: prefix.into(),
        preset,
        priority: 0,
        timeout_ms: None,
        cache_ttl_ms: None,
        cache_enabled: None,
        circuit_breaker: None,
        retry: None,
    }
}

#[tokio::test]
async fn test_retry_on_upstream_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, r#"{"error":"busy"}"#.into())
            } else {
                (200, r#"{"staff":[]}"#.into())
            }
        }
    })
    .await;

    let mut config = GatewayConfig::default();
    config.upstream.base_url = format!("http://{}", backend);
    let mut staff = route("/api/staff", PresetName::CriticalBusiness);
    staff.retry = Some(RetryConfig {
        max_retries: 3,
        initial_delay_ms: 20,
        max_delay_ms: 50,
        ..RetryConfig::default()
    });
    config.routes.push(staff);
    let (base, shutdown, _) = start_gateway(config).await;

    let res = client()
        .get(format!("{}/api/staff", base))
        .send()
        .await
        .expect("Gateway unreachable");

    assert_eq!(res.status(), 200, "Should eventually succeed after retries");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-resilience-circuit-state"], "closed");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_upstream_reports_failure() {
    // nothing listens on the discard port
    let mut config = GatewayConfig::default();
    config.upstream.base_url = "http://127.0.0.1:9".into();
    config.upstream.connect_timeout_ms = 200;
    let mut reports = route("/api/reports", PresetName::DataWrite);
    reports.retry = Some(RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    });
    config.routes.push(reports);
    let (base, shutdown, _) = start_gateway(config).await;

    let res = client()
        .get(format!("{}/api/reports/monthly", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.headers()["x-resilience-error"], "UpstreamError");

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["circuit"], "api:/api/reports/monthly");
    shutdown.trigger();
}

#[tokio::test]
async fn test_cached_read_survives_upstream_outage() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                (200, r#"{"present":18}"#.into())
            } else {
                (500, r#"{"error":"db down"}"#.into())
            }
        }
    })
    .await;

    let mut config = GatewayConfig::default();
    config.upstream.base_url = format!("http://{}", backend);
    config.routes.push(route("/api/attendance", PresetName::HighFrequencyRead));
    let (base, shutdown, _) = start_gateway(config).await;
    let client = client();

    let first = client.get(format!("{}/api/attendance", base)).send().await.unwrap();
    assert_eq!(first.headers()["x-resilience-cache"], "MISS");

    let second = client.get(format!("{}/api/attendance", base)).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-resilience-cache"], "HIT");
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["present"], 18);
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_graceful_shutdown_stops_server() {
    let (_, shutdown, handle) = start_gateway(GatewayConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}
