//! Office gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ request id / trace / timeout
//!               └─▶ csrf middleware (state-changing methods)
//!                    ├─▶ /api/csrf-token[/rotate]     issue / rotate tokens
//!                    └─▶ /api/**  resilience middleware ──▶ upstream app
//!                                 (route policy, breaker, retry,
//!                                  response cache, fallback)
//!
//!   admin listener ──▶ bearer auth ──▶ /admin/status, /admin/resilience/**
//!   maintenance task: cache prune, idle metrics purge, csrf cleanup
//!   config watcher:   route policy hot reload
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use office_gateway::admin::setup_admin_router;
use office_gateway::config::watcher::ConfigWatcher;
use office_gateway::config::{load_config, GatewayConfig};
use office_gateway::lifecycle::MaintenanceTask;
use office_gateway::net::tls::load_tls_config;
use office_gateway::observability::{logging, metrics};
use office_gateway::{AppState, HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "office-gateway")]
#[command(about = "Resilience and CSRF gateway for the office application", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "office-gateway starting");
    tracing::info!(
        environment = ?config.environment,
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let state = AppState::new(config.clone())?;
    let shutdown = Shutdown::new();
    tokio::spawn(shutdown.clone().listen_for_ctrl_c());

    let maintenance = MaintenanceTask::new(
        state.resilience.clone(),
        state.response_cache.clone(),
        state.csrf.clone(),
        Duration::from_secs(config.resilience.maintenance_interval_secs),
    );
    tokio::spawn(maintenance.run(shutdown.subscribe()));

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let reload_state = state.clone();
            tokio::spawn(async move {
                while let Some(updated) = updates.recv().await {
                    reload_state.apply_reload(&updated);
                    tracing::info!(routes = updated.routes.len(), "Route policies reloaded");
                }
            });
            match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin = setup_admin_router(state.clone());
        let signal = shutdown.wait();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(signal)
                .await
            {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        });
    }

    let server = HttpServer::new(state);
    match &config.listener.tls {
        Some(tls) => {
            let rustls = load_tls_config(tls).await?;
            let addr = config.listener.bind_address.parse()?;
            server.run_tls(addr, rustls, shutdown).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
