//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build shared application state from configuration
//! - Create the Axum router (CSRF endpoints + protected `/api` forwarding)
//! - Wire up middleware (CSRF, resilience, timeout, request ID, tracing)
//! - Serve plain or TLS with graceful shutdown

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::Response,
    routing::{any, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::csrf_routes::{issue_token, rotate_token};
use crate::http::middleware::{csrf_middleware, resilience_middleware};
use crate::http::upstream::{Upstream, UpstreamError};
use crate::lifecycle::Shutdown;
use crate::resilience::cache::ResponseCache;
use crate::resilience::ResilienceService;
use crate::routing::{PolicyTable, RoutePolicies};
use crate::security::CsrfService;

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub resilience: Arc<ResilienceService>,
    pub response_cache: Arc<ResponseCache>,
    pub csrf: Arc<CsrfService>,
    pub policies: Arc<RoutePolicies>,
    pub upstream: Upstream,
}

impl AppState {
    /// Build every service from configuration, with in-memory stores.
    pub fn new(config: GatewayConfig) -> Result<Self, UpstreamError> {
        let upstream = Upstream::new(&config.upstream)?;
        let policies = RoutePolicies::new(PolicyTable::from_config(&config.routes, &config.resilience));
        let response_cache =
            ResponseCache::new(Duration::from_millis(config.resilience.cache_ttl_ms));

        Ok(Self {
            resilience: Arc::new(ResilienceService::new(config.resilience.clone())),
            response_cache: Arc::new(response_cache),
            csrf: Arc::new(CsrfService::new(config.csrf.clone())),
            policies: Arc::new(policies),
            upstream,
            config: Arc::new(config),
        })
    }

    /// Apply the route table of a reloaded configuration.
    pub fn apply_reload(&self, config: &GatewayConfig) {
        self.policies
            .replace(PolicyTable::from_config(&config.routes, &config.resilience));
    }
}

/// Forward a protected `/api` request upstream.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.upstream.forward(request).await
}

/// Routes served by the gateway itself, plus the protected upstream surface.
///
/// `protected` receives the resilience middleware; the CSRF middleware wraps
/// everything. Tests pass their own protected router in place of the
/// upstream forwarder.
pub fn build_api_router(state: AppState, protected: Router<AppState>) -> Router {
    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        resilience_middleware,
    ));

    Router::new()
        .route("/api/csrf-token", get(issue_token))
        .route("/api/csrf-token/rotate", post(rotate_token))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), csrf_middleware))
        .with_state(state)
}

/// Full gateway router with the ambient layers.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);
    let forwarded = Router::new()
        .route("/api", any(forward_handler))
        .route("/api/{*path}", any(forward_handler));

    build_api_router(state, forwarded).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve plain HTTP until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: axum_server::tls_rustls::RustlsConfig,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        let signal = shutdown.wait();
        tokio::spawn(async move {
            signal.await;
            drain.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}
