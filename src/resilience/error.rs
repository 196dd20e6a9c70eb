//! Error taxonomy for protected operations.

use thiserror::Error;

/// Errors produced by, or surfaced through, the resilience layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResilienceError {
    /// Breaker rejected the call while open.
    #[error("Circuit breaker {name} is OPEN")]
    CircuitOpen { name: String },

    /// Breaker rejected the call while half-open with every probe slot taken.
    #[error("Circuit breaker {name} is HALF_OPEN and at capacity")]
    CircuitSaturated { name: String },

    /// The operation did not complete within its deadline.
    #[error("Request timeout after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Downstream answered with a failure status.
    #[error("Upstream responded with status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Network-level or otherwise transient failure.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Caller passed something the operation cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broken internal assumption (bug, not a fault).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResilienceError {
    /// Stable error name, used for the `X-Resilience-Error` header.
    pub fn name(&self) -> &'static str {
        match self {
            ResilienceError::CircuitOpen { .. } => "CircuitOpenError",
            ResilienceError::CircuitSaturated { .. } => "CircuitSaturatedError",
            ResilienceError::Timeout { .. } => "TimeoutError",
            ResilienceError::Upstream { .. } => "UpstreamError",
            ResilienceError::Transient(_) => "TransientError",
            ResilienceError::InvalidArgument(_) => "InvalidArgumentError",
            ResilienceError::Internal(_) => "InternalError",
        }
    }

    /// Programming errors are never retried.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            ResilienceError::InvalidArgument(_) | ResilienceError::Internal(_)
        )
    }

    /// Synthetic rejection raised by a breaker gate.
    pub fn is_breaker_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::CircuitSaturated { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }

    /// Status code of an upstream failure, if that is what this is.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ResilienceError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for protected operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
