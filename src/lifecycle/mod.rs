//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build services → Spawn maintenance → Listen
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → servers drain, maintenance loop exits
//!
//! Maintenance (maintenance.rs):
//!     every interval → prune caches, idle metrics, stale CSRF tokens
//! ```

pub mod maintenance;
pub mod shutdown;

pub use maintenance::MaintenanceTask;
pub use shutdown::Shutdown;
