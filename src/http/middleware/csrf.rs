//! CSRF enforcement for state-changing requests.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::http::server::AppState;
use crate::security::request::validate_request;

/// Token issuance must stay reachable without a token.
const EXEMPT_PATHS: [&str; 1] = ["/api/csrf-token"];

pub fn requires_token(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub async fn csrf_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !requires_token(request.method()) || EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    if validate_request(&state.csrf, request.headers(), state.config.environment) {
        return next.run(request).await;
    }

    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({
            "error": "Forbidden",
            "message": "CSRF token missing or invalid",
        })),
    )
        .into_response()
}
