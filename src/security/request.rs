//! CSRF request context.
//!
//! # Responsibilities
//! - Extract the submitted token (headers first, then the cookie)
//! - Derive session id, client IP and user agent
//! - Validate a request, including the development cookie fallback
//!
//! Missing IP or user agent become [`UNKNOWN_CLIENT`] both when a token is
//! issued and when it is checked.

use axum::http::{header, HeaderMap};

use crate::config::Environment;
use crate::security::csrf::{constant_time_eq, CsrfBinding, CsrfService, UNKNOWN_CLIENT};

/// Token headers in precedence order.
pub const TOKEN_HEADERS: [&str; 3] = ["x-xsrf-token", "x-csrf-token", "csrf-token"];

pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
pub const SESSION_COOKIE: &str = "auth_session";
pub const LEGACY_SESSION_COOKIE: &str = "session_id";

/// Value of cookie `name` across all `Cookie` headers.
pub fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Token from the first non-empty token header.
pub fn header_token(headers: &HeaderMap) -> Option<String> {
    TOKEN_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(non_empty)
    })
}

/// Submitted token: headers by precedence, then the `XSRF-TOKEN` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    header_token(headers).or_else(|| cookie(headers, XSRF_COOKIE).and_then(non_empty))
}

/// Session id from `auth_session`, then `session_id`.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    cookie(headers, SESSION_COOKIE)
        .or_else(|| cookie(headers, LEGACY_SESSION_COOKIE))
        .filter(|v| !v.is_empty())
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(non_empty)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(non_empty)
        })
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
}

/// Identifiers derived from one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub token: Option<String>,
    pub session_id: String,
    /// False when the session id was freshly generated.
    pub has_session_cookie: bool,
    pub ip: String,
    pub user_agent: String,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let session = session_cookie(headers);
        Self {
            token: extract_token(headers),
            has_session_cookie: session.is_some(),
            session_id: session
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ip: client_ip(headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
            user_agent: user_agent(headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
        }
    }

    pub fn binding(&self) -> CsrfBinding<'_> {
        CsrfBinding::new(
            Some(&self.session_id),
            Some(&self.ip),
            Some(&self.user_agent),
        )
    }
}

/// Whether the cookie-equals-header fallback may be used.
///
/// Requires a debug build, the development environment and the config
/// switch. Release builds never honour it.
pub fn dev_fallback_enabled(service: &CsrfService, environment: Environment) -> bool {
    cfg!(debug_assertions)
        && environment == Environment::Development
        && service.config().dev_cookie_fallback
}

/// Validate the token carried by a request.
pub fn validate_request(service: &CsrfService, headers: &HeaderMap, environment: Environment) -> bool {
    let ctx = RequestContext::from_headers(headers);
    if service.validate(ctx.token.as_deref(), ctx.binding()) {
        return true;
    }

    if dev_fallback_enabled(service, environment) && ctx.has_session_cookie {
        if let (Some(cookie_token), Some(header)) = (cookie(headers, XSRF_COOKIE), header_token(headers)) {
            if !cookie_token.is_empty() && constant_time_eq(cookie_token, &header) {
                tracing::warn!(
                    ip = %ctx.ip,
                    "CSRF token not in store, accepting cookie/header match (development fallback)"
                );
                return true;
            }
        }
    }

    tracing::warn!(ip = %ctx.ip, has_token = ctx.token.is_some(), "CSRF validation failed");
    false
}
