//! TTL caches.
//!
//! One generic [`TtlCache`] backs both the service-level value cache
//! ([`ValueCache`], JSON values keyed by caller-chosen keys) and the
//! middleware-level [`ResponseCache`] (HTTP response snapshots).
//!
//! An entry is logically absent once `now > expiry`. Expired entries are
//! deleted lazily on read, or in bulk by [`TtlCache::prune`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::resilience::epoch_ms;
use crate::resilience::store::{MemoryStore, SharedStore};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    /// Unix epoch milliseconds at insertion.
    pub timestamp: u64,
    pub expiry: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expiry
    }
}

/// Size and last sweep time of a cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    /// Unix epoch milliseconds of the last prune, if one has run.
    pub last_pruned: Option<u64>,
}

/// Key/value cache with per-entry expiry.
pub struct TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    store: SharedStore<CacheEntry<V>>,
    default_ttl: Duration,
    last_pruned: AtomicU64,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// In-memory cache with the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_store(MemoryStore::shared(), default_ttl)
    }

    pub fn with_store(store: SharedStore<CacheEntry<V>>, default_ttl: Duration) -> Self {
        Self {
            store,
            default_ttl,
            last_pruned: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Live value for `key`; an expired entry is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Live entry for `key`, including its timestamps.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        let mut live = None;
        self.store.compute(key, &mut |current| match current {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => {
                live = Some(entry.clone());
                Some(entry)
            }
            None => None,
        });
        live
    }

    /// Store `value` with `expiry = now + (ttl or the default TTL)`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                timestamp: epoch_ms(),
                expiry: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.store.remove(key).map(|entry| entry.value)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(&mut |_, entry| !entry.is_expired(now));
        self.last_pruned.store(epoch_ms(), Ordering::Relaxed);
        before.saturating_sub(self.store.len())
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let last = self.last_pruned.load(Ordering::Relaxed);
        CacheStats {
            size: self.store.len(),
            last_pruned: (last > 0).then_some(last),
        }
    }
}

/// Service-level cache of serialized operation results.
pub type ValueCache = TtlCache<serde_json::Value>;

/// Middleware-level cache of HTTP responses.
pub type ResponseCache = TtlCache<CachedResponse>;

/// JSON-serializable snapshot of a successful HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}
