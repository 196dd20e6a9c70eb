//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → policy.rs (ordered policy lookup)
//!     → matcher.rs (segment-aware prefix match)
//!     → Return: MiddlewareOptions for the route (or defaults)
//!
//! Policy compilation (startup and reload):
//!     RoutePolicyConfig[]
//!     → preset + overrides → MiddlewareOptions
//!     → sort by priority, then prefix length
//!     → swap into RoutePolicies
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same policy

pub mod matcher;
pub mod policy;

pub use policy::{PolicyTable, RoutePolicies};
