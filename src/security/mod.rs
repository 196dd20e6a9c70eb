//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Token issuance (GET /api/csrf-token):
//!     → request.rs (session id, client IP, user agent)
//!     → csrf.rs (generate, bind, store)
//!     → cookies.rs (XSRF-TOKEN + auth_session cookies)
//!
//! Unsafe request (POST/PUT/PATCH/DELETE):
//!     → request.rs (extract token + context)
//!     → csrf.rs (validate, consume one use)
//!     → 403 on rejection
//! ```
//!
//! # Design Decisions
//! - Rejection is a value, not an error; the HTTP layer decides the status
//! - Fail closed: any missing or mismatched binding rejects

pub mod cookies;
pub mod csrf;
pub mod request;

pub use csrf::{CsrfBinding, CsrfRejection, CsrfService};
