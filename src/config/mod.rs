//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors reported)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → new route policy table swapped in (routing::RoutePolicies)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid reload is logged and ignored

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, CsrfConfig, Environment, GatewayConfig, LogFormat,
    ObservabilityConfig, PresetName, ResilienceConfig, RetryConfig, RoutePolicyConfig,
};
