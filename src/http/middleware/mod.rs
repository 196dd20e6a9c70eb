//! Request middleware.

pub mod csrf;
pub mod resilience;

pub use csrf::csrf_middleware;
pub use resilience::resilience_middleware;
