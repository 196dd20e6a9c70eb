//! Anti-forgery token service.
//!
//! # Token Lifecycle
//! ```text
//! issued ──validate ok──▶ issued (use_count + 1, expiry slides forward)
//!    │
//!    ├── now > expires          → removed (expired)
//!    ├── use_count >= max_uses  → removed (exhausted)
//!    └── rotate                 → removed
//! ```
//!
//! Terminal states are represented only by absence from the store.
//!
//! Tokens are bound to the raw session id and to SHA-256 digests of the
//! client IP and user agent. Bindings are only checked for the values the
//! validating caller supplies.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CsrfConfig;
use crate::observability::metrics;
use crate::resilience::store::{MemoryStore, SharedStore};

/// Random bytes per token; the token is their hex encoding.
pub const TOKEN_BYTES: usize = 64;

/// Stand-in for a missing IP or user agent.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Contextual identifiers a token is bound to.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfBinding<'a> {
    pub session_id: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl<'a> CsrfBinding<'a> {
    pub fn new(session_id: Option<&'a str>, ip: Option<&'a str>, user_agent: Option<&'a str>) -> Self {
        Self {
            session_id,
            ip,
            user_agent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsrfTokenRecord {
    pub session_id: Option<String>,
    pub ip_hash: String,
    pub user_agent_hash: String,
    pub created_at: Instant,
    pub expires: Instant,
    pub use_count: u32,
}

impl CsrfTokenRecord {
    fn binding_matches(&self, binding: &CsrfBinding<'_>) -> bool {
        if let Some(session_id) = binding.session_id {
            match &self.session_id {
                Some(bound) if constant_time_eq(bound, session_id) => {}
                _ => return false,
            }
        }
        if let Some(ip) = binding.ip {
            if !constant_time_eq(&self.ip_hash, &hash_identifier(ip)) {
                return false;
            }
        }
        if let Some(user_agent) = binding.user_agent {
            if !constant_time_eq(&self.user_agent_hash, &hash_identifier(user_agent)) {
                return false;
            }
        }
        true
    }
}

/// Why a token failed validation.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CsrfRejection {
    #[error("token missing or malformed")]
    Malformed,
    #[error("token unknown")]
    Unknown,
    #[error("token expired")]
    Expired,
    #[error("token use limit reached")]
    Exhausted,
    #[error("token binding mismatch")]
    BindingMismatch,
}

/// Issues, validates and rotates anti-forgery tokens.
pub struct CsrfService {
    tokens: SharedStore<CsrfTokenRecord>,
    config: CsrfConfig,
}

impl CsrfService {
    pub fn new(config: CsrfConfig) -> Self {
        Self::with_store(MemoryStore::shared(), config)
    }

    pub fn with_store(tokens: SharedStore<CsrfTokenRecord>, config: CsrfConfig) -> Self {
        Self { tokens, config }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.token_ttl_secs)
    }

    /// Issue a fresh token bound to `binding`.
    pub fn generate(&self, binding: CsrfBinding<'_>) -> String {
        self.cleanup();

        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = Instant::now();
        self.tokens.insert(
            token.clone(),
            CsrfTokenRecord {
                session_id: binding.session_id.map(str::to_string),
                ip_hash: hash_identifier(binding.ip.unwrap_or(UNKNOWN_CLIENT)),
                user_agent_hash: hash_identifier(binding.user_agent.unwrap_or(UNKNOWN_CLIENT)),
                created_at: now,
                expires: now + self.ttl(),
                use_count: 0,
            },
        );

        tracing::debug!(session_bound = binding.session_id.is_some(), "CSRF token issued");
        token
    }

    /// Validate `token`, consuming one use and sliding its expiry on success.
    pub fn check(&self, token: Option<&str>, binding: CsrfBinding<'_>) -> Result<(), CsrfRejection> {
        let token = match token {
            Some(t) if t.len() >= self.config.min_token_length => t,
            _ => return Err(CsrfRejection::Malformed),
        };

        let now = Instant::now();
        let ttl = self.ttl();
        let max_uses = self.config.max_uses;
        let mut outcome = Err(CsrfRejection::Unknown);

        self.tokens.compute(token, &mut |current| {
            let mut record = current?;
            if now > record.expires {
                outcome = Err(CsrfRejection::Expired);
                return None;
            }
            if record.use_count >= max_uses {
                outcome = Err(CsrfRejection::Exhausted);
                return None;
            }
            if !record.binding_matches(&binding) {
                outcome = Err(CsrfRejection::BindingMismatch);
                return Some(record);
            }
            record.use_count += 1;
            record.expires = now + ttl;
            outcome = Ok(());
            Some(record)
        });

        outcome
    }

    pub fn validate(&self, token: Option<&str>, binding: CsrfBinding<'_>) -> bool {
        match self.check(token, binding) {
            Ok(()) => {
                metrics::record_csrf_validation(true);
                true
            }
            Err(rejection) => {
                metrics::record_csrf_validation(false);
                tracing::debug!(reason = %rejection, "CSRF token rejected");
                false
            }
        }
    }

    /// Drop `old_token` unconditionally and issue a replacement.
    pub fn rotate(&self, old_token: &str, binding: CsrfBinding<'_>) -> String {
        self.tokens.remove(old_token);
        self.generate(binding)
    }

    /// Remove expired and exhausted tokens. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let max_uses = self.config.max_uses;
        let before = self.tokens.len();
        self.tokens
            .retain(&mut |_, record| now <= record.expires && record.use_count < max_uses);
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Hex SHA-256 of an IP or user agent.
pub fn hash_identifier(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
