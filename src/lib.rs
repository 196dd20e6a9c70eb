//! Office gateway library.
//!
//! Resilience layer (circuit breakers, retries, TTL caches, per-operation
//! metrics) and anti-forgery token service in front of an office
//! management application.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Protection
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
