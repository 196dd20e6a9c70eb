//! Injectable key/value stores.
//!
//! Every piece of process-wide state (breakers, caches, metrics, CSRF
//! tokens) lives behind [`KeyValueStore`] so a deployment can replace the
//! in-memory map with a shared store without touching call sites. The
//! bundled [`MemoryStore`] is local to one process: instances do not share
//! breakers, caches, metrics or tokens.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Minimal map interface used by all stateful components.
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync,
{
    /// Return a copy of the value stored under `key`.
    fn get(&self, key: &str) -> Option<V>;

    /// Insert or overwrite `key`.
    fn insert(&self, key: String, value: V);

    /// Remove `key`, returning the previous value.
    fn remove(&self, key: &str) -> Option<V>;

    /// Atomic read-modify-write of a single key.
    ///
    /// `f` receives the current value (if any) and returns the value to
    /// store, or `None` to delete the key. `f` must not call back into the
    /// same store.
    fn compute(&self, key: &str, f: &mut dyn FnMut(Option<V>) -> Option<V>);

    /// Keep only the entries for which `keep` returns true.
    fn retain(&self, keep: &mut dyn FnMut(&str, &V) -> bool);

    /// Snapshot of every entry.
    fn entries(&self) -> Vec<(String, V)>;

    fn len(&self) -> usize;

    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the value under `key`, creating it with `init` when absent.
    fn get_or_insert_with(&self, key: &str, init: &mut dyn FnMut() -> V) -> V {
        let mut out = None;
        self.compute(key, &mut |current| {
            let value = current.unwrap_or_else(&mut *init);
            out = Some(value.clone());
            Some(value)
        });
        // compute always stores a value above
        out.unwrap_or_else(init)
    }
}

/// Shared handle to a store.
pub type SharedStore<V> = Arc<dyn KeyValueStore<V>>;

/// In-process store backed by a sharded concurrent map.
#[derive(Debug)]
pub struct MemoryStore<V> {
    inner: DashMap<String, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Convenience constructor returning the store as a [`SharedStore`].
    pub fn shared() -> SharedStore<V> {
        Arc::new(Self::new())
    }
}

impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    fn insert(&self, key: String, value: V) {
        self.inner.insert(key, value);
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    fn compute(&self, key: &str, f: &mut dyn FnMut(Option<V>) -> Option<V>) {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match f(Some(occupied.get().clone())) {
                Some(value) => {
                    occupied.insert(value);
                }
                None => {
                    occupied.remove();
                }
            },
            Entry::Vacant(vacant) => {
                if let Some(value) = f(None) {
                    vacant.insert(value);
                }
            }
        }
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &V) -> bool) {
        self.inner.retain(|k, v| keep(k, v));
    }

    fn entries(&self) -> Vec<(String, V)> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn clear(&self) {
        self.inner.clear();
    }
}
