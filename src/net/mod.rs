//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! [listener.tls] present?
//!     → tls.rs (load PEM cert + key into rustls)
//!     → axum-server TLS listener
//! otherwise
//!     → plain tokio TcpListener
//! ```

pub mod tls;
