//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing macros (structured events, request spans from TraceLayer)
//!     → metrics.rs (counters and histograms via the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Prometheus scrape endpoint (metrics_address)
//! ```
//!
//! The in-process per-operation collector lives in
//! `resilience::metrics`; this module only exports.

pub mod logging;
pub mod metrics;
