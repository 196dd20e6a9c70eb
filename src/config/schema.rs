//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the office gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment environment (gates secure cookies and CSRF dev fallback).
    pub environment: Environment,

    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Upstream office application.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Resilience defaults and maintenance intervals.
    pub resilience: ResilienceConfig,

    /// Per-path resilience policies.
    pub routes: Vec<RoutePolicyConfig>,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

impl GatewayConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream application the `/api` surface forwards to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL (scheme + authority), e.g. "http://127.0.0.1:3000".
    pub base_url: String,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            connect_timeout_ms: 2_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard ceiling for a whole request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Circuit breaker thresholds. Immutable once a breaker is created.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Net failures (failures minus successes, floored at zero) before opening.
    pub failure_threshold: u32,

    /// Time in OPEN before a call may probe, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Concurrent probes admitted, and successes required, in HALF_OPEN.
    pub half_open_max_calls: u32,

    /// Rolling 60s error rate (0-100) that opens the breaker.
    pub error_threshold_percentage: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 3,
            error_threshold_percentage: 50.0,
        }
    }
}

/// Retry with exponential backoff.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Ceiling for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Random extra delay as a fraction of the computed delay (0 disables).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }
}

/// Resilience defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,

    pub retry: RetryConfig,

    /// Default TTL for the value cache, in milliseconds.
    pub cache_ttl_ms: u64,

    /// Interval of the background prune task, in seconds.
    pub maintenance_interval_secs: u64,

    /// Metric records idle longer than this are purged, in seconds.
    pub metrics_idle_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            cache_ttl_ms: 60_000,
            maintenance_interval_secs: 60,
            metrics_idle_secs: 300,
        }
    }
}

/// Named middleware configuration bundles.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresetName {
    HighFrequencyRead,
    DataWrite,
    ThirdPartyApi,
    CriticalBusiness,
}

/// Resilience policy for a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutePolicyConfig {
    /// Path prefix to match (e.g. "/api/attendance").
    pub path_prefix: String,

    /// Preset the policy starts from.
    pub preset: PresetName,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Overrides applied on top of the preset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,

    /// Set to false to disable response caching even if the preset caches.
    #[serde(default)]
    pub cache_enabled: Option<bool>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Sliding expiry window in seconds.
    pub token_ttl_secs: u64,

    /// Validations allowed per token.
    pub max_uses: u32,

    /// Tokens shorter than this are rejected without lookup.
    pub min_token_length: usize,

    /// Accept cookie == header when the token store lost the token.
    /// Only honoured in debug builds running in the development environment.
    pub dev_cookie_fallback: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 30 * 60,
            max_uses: 100,
            min_token_length: 32,
            dev_cookie_fallback: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body buffered for retries, in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
