//! CSRF token endpoints.
//!
//! - `GET /api/csrf-token` issues a token bound to the caller
//! - `POST /api/csrf-token/rotate` replaces the submitted token
//!
//! Both set the `XSRF-TOKEN` and `auth_session` cookies.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

use crate::http::server::AppState;
use crate::security::cookies::CookiePolicy;
use crate::security::request::RequestContext;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub csrf_token: String,
    /// Seconds until the token expires if unused.
    pub expires_in: u64,
}

fn token_response(state: &AppState, ctx: &RequestContext, token: String) -> Response {
    let ttl = state.csrf.config().token_ttl_secs;
    let cookies = CookiePolicy::new(state.config.is_production(), Duration::from_secs(ttl));

    let (xsrf, session) = match (cookies.xsrf_token(&token), cookies.session(&ctx.session_id)) {
        (Ok(xsrf), Ok(session)) => (xsrf, session),
        _ => {
            tracing::error!("Failed to encode CSRF cookies");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Json(TokenResponse {
        csrf_token: token,
        expires_in: ttl,
    })
    .into_response();
    let headers = response.headers_mut();
    headers.append(header::SET_COOKIE, xsrf);
    headers.append(header::SET_COOKIE, session);
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    response
}

pub async fn issue_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = RequestContext::from_headers(&headers);
    let token = state.csrf.generate(ctx.binding());
    token_response(&state, &ctx, token)
}

pub async fn rotate_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = RequestContext::from_headers(&headers);
    let old = ctx.token.clone().unwrap_or_default();
    let token = state.csrf.rotate(&old, ctx.binding());
    tracing::debug!(session_bound = ctx.has_session_cookie, "CSRF token rotated");
    token_response(&state, &ctx, token)
}
