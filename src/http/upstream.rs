//! Forwarding to the upstream office application.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the upstream base URL
//! - Forward over a pooled hyper-util client
//! - Turn connection failures into 502 responses
//!
//! Network errors surface as 502 so the resilience middleware accounts for
//! them like any other upstream 5xx.

use axum::body::Body;
use axum::http::uri::{Authority, InvalidUri, Scheme};
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;

use crate::config::schema::UpstreamConfig;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL: {0}")]
    InvalidUri(#[from] InvalidUri),

    #[error("upstream URL has no host")]
    MissingAuthority,
}

/// Client bound to one upstream base URL.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base: Uri = config.base_url.parse()?;
        let authority = base.authority().cloned().ok_or(UpstreamError::MissingAuthority)?;
        let scheme = base.scheme().cloned().unwrap_or(Scheme::HTTP);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            scheme,
            authority,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Same path and query, upstream scheme and authority.
    pub fn target_uri(&self, original: &Uri) -> Result<Uri, axum::http::Error> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }

    pub async fn forward(&self, request: Request<Body>) -> Response {
        let (mut parts, body) = request.into_parts();

        parts.uri = match self.target_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build upstream URI");
                return bad_gateway("Invalid upstream request");
            }
        };
        if let Ok(host) = HeaderValue::from_str(self.authority.as_str()) {
            parts.headers.insert(header::HOST, host);
        }

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (parts, body): (_, Incoming) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::warn!(upstream = %self.authority, error = %e, "Upstream request failed");
                bad_gateway("Upstream request failed")
            }
        }
    }
}

fn bad_gateway(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({
            "error": "Bad Gateway",
            "message": message,
        })),
    )
        .into_response()
}
