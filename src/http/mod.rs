//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (request id, trace span, global timeout)
//!     → middleware::csrf (unsafe methods need a valid token)
//!     → csrf_routes.rs (token issue / rotate)
//!     → middleware::resilience (cache, breaker, retry, deadline)
//!     → upstream.rs (forward to the office application)
//!     → Send to client
//! ```

pub mod csrf_routes;
pub mod middleware;
pub mod server;
pub mod upstream;

pub use server::{build_api_router, build_router, AppState, HttpServer};
