//! Route matching logic.
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A prefix matches whole segments only: `/api/staff` matches
//!   `/api/staff` and `/api/staff/7`, not `/api/staffing`
//! - No regex to guarantee O(n) matching

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. A trailing `/` is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Length used to break priority ties (longer is more specific).
    pub fn specificity(&self) -> usize {
        self.prefix.len()
    }
}
