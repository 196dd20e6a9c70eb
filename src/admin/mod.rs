//! Administrative API.
//!
//! Served on its own bind address, every route behind bearer auth:
//! - `GET /admin/status`
//! - `GET /admin/resilience`
//! - `DELETE /admin/resilience/cache`
//! - `POST /admin/resilience/breakers/reset`

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/resilience", get(get_resilience))
        .route("/admin/resilience/cache", delete(clear_cache))
        .route("/admin/resilience/breakers/reset", post(reset_breakers))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
