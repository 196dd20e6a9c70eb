//! Bearer-token authentication for the admin API.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::security::csrf::constant_time_eq;

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|key| constant_time_eq(key, &state.config.admin.api_key));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Admin request rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
