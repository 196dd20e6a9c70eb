//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, percentages in 0..=100)
//! - Validate addresses and the upstream URL
//! - Detect duplicate route prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system, including on reload

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{
    CircuitBreakerConfig, Environment, GatewayConfig, RetryConfig, PLACEHOLDER_API_KEY,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} must be between 0 and 100, got {value}")]
    PercentageOutOfRange { field: String, value: f64 },

    #[error("{field} must be at least 1.0, got {value}")]
    MultiplierTooSmall { field: String, value: f64 },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("upstream.base_url is invalid: {0}")]
    InvalidUpstream(String),

    #[error("route path_prefix must start with '/': {0}")]
    InvalidPrefix(String),

    #[error("duplicate route path_prefix: {0}")]
    DuplicatePrefix(String),

    #[error("admin.api_key must be changed in production")]
    PlaceholderApiKey,
}

fn check_breaker(field: &str, cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::NotPositive {
            field: format!("{}.failure_threshold", field),
        });
    }
    if cb.half_open_max_calls == 0 {
        errors.push(ValidationError::NotPositive {
            field: format!("{}.half_open_max_calls", field),
        });
    }
    if !(0.0..=100.0).contains(&cb.error_threshold_percentage) {
        errors.push(ValidationError::PercentageOutOfRange {
            field: format!("{}.error_threshold_percentage", field),
            value: cb.error_threshold_percentage,
        });
    }
}

fn check_retry(field: &str, retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::MultiplierTooSmall {
            field: format!("{}.backoff_multiplier", field),
            value: retry.backoff_multiplier,
        });
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        errors.push(ValidationError::PercentageOutOfRange {
            field: format!("{}.jitter_ratio", field),
            value: retry.jitter_ratio * 100.0,
        });
    }
}

fn check_address(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);

    match url::Url::parse(&config.upstream.base_url) {
        Ok(url) if url.scheme() == "http" && url.host().is_some() => {}
        Ok(url) => errors.push(ValidationError::InvalidUpstream(format!(
            "only http:// upstreams with a host are supported, got {}",
            url
        ))),
        Err(e) => errors.push(ValidationError::InvalidUpstream(e.to_string())),
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "timeouts.request_secs".into(),
        });
    }

    check_breaker("resilience.circuit_breaker", &config.resilience.circuit_breaker, &mut errors);
    check_retry("resilience.retry", &config.resilience.retry, &mut errors);
    if config.resilience.maintenance_interval_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "resilience.maintenance_interval_secs".into(),
        });
    }

    let mut prefixes = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix(route.path_prefix.clone()));
        }
        if !prefixes.insert(route.path_prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix(route.path_prefix.clone()));
        }
        if let Some(cb) = &route.circuit_breaker {
            check_breaker(&format!("routes[{}].circuit_breaker", i), cb, &mut errors);
        }
        if let Some(retry) = &route.retry {
            check_retry(&format!("routes[{}].retry", i), retry, &mut errors);
        }
        if route.timeout_ms == Some(0) {
            errors.push(ValidationError::NotPositive {
                field: format!("routes[{}].timeout_ms", i),
            });
        }
    }

    if config.csrf.token_ttl_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "csrf.token_ttl_secs".into(),
        });
    }
    if config.csrf.max_uses == 0 {
        errors.push(ValidationError::NotPositive {
            field: "csrf.max_uses".into(),
        });
    }

    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
        if config.environment == Environment::Production && config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::PlaceholderApiKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
