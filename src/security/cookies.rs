//! Set-Cookie issuance for the CSRF surface.
//!
//! `XSRF-TOKEN` stays readable by client script so it can be echoed back in
//! a header; `auth_session` is HttpOnly. Both are `SameSite=Strict` and
//! carry `Secure` in production.

use axum::http::header::InvalidHeaderValue;
use axum::http::HeaderValue;
use std::time::Duration;

use crate::security::request::{SESSION_COOKIE, XSRF_COOKIE};

#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub max_age: Duration,
}

impl CookiePolicy {
    pub fn new(secure: bool, max_age: Duration) -> Self {
        Self { secure, max_age }
    }

    fn render(&self, name: &str, value: &str, http_only: bool) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Strict",
            name,
            value,
            self.max_age.as_secs()
        );
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    pub fn xsrf_token(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(XSRF_COOKIE, token, false)
    }

    pub fn session(&self, session_id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(SESSION_COOKIE, session_id, true)
    }
}
