//! Shared resource cache
//!
//! A reference-counted get-or-create registry. Three instantiations back the
//! pool: plugin bundles, model clients and execution templates.
//!
//! ## Invariants
//!
//! - An entry present in the registry has `refs >= 1`
//! - At most one build runs per key at a time; concurrent callers for the same
//!   key wait for it and share the result
//! - A failed or cancelled build inserts nothing
//! - When `refs` reaches 0 the entry is removed first, then its release hook
//!   runs outside the registry lock; a failing hook is logged and ignored
//!
//! The registry itself is a short std mutex never held across an await.
//! Builds are serialized per key through a map of async mutexes, so unrelated
//! keys never wait on each other.

use crate::error::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// A value that can live in a [`SharedResourceCache`]
#[async_trait::async_trait]
pub trait SharedResource: Send + Sync {
    /// Called once when the last reference is dropped or the cache is drained
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Reference count statistics for one cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Sum of reference counts
    pub total_refs: usize,
    /// Average references per entry (0 when empty)
    pub avg_refs: f64,
}

struct CacheEntry<V: ?Sized> {
    value: Arc<V>,
    refs: usize,
}

/// One slot of a per-key async lock map.
///
/// The map entry is removed when the last slot for its key is dropped,
/// whether the holder finished or its future was cancelled.
pub(crate) struct KeyedLock<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Arc<tokio::sync::Mutex<()>>>,
    key: K,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a, K: Eq + Hash + Clone> KeyedLock<'a, K> {
    pub(crate) fn new(locks: &'a DashMap<K, Arc<tokio::sync::Mutex<()>>>, key: K) -> Self {
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Self { locks, key, lock }
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl<K: Eq + Hash> Drop for KeyedLock<'_, K> {
    fn drop(&mut self) {
        // Two strong refs left: the map's and ours
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Reference-counted get-or-create registry
pub struct SharedResourceCache<K, V: ?Sized> {
    name: &'static str,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    build_locks: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

impl<K, V> SharedResourceCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    V: SharedResource + ?Sized,
{
    /// Create an empty cache; `name` is used in logs
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            build_locks: DashMap::new(),
        }
    }

    /// Cache name
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the cached value for `key` (taking a reference), or build it.
    ///
    /// Returns `(value, was_cached)`. On a miss the new entry starts with one
    /// reference. Build errors propagate and leave the cache unchanged.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        key: K,
        build: F,
    ) -> std::result::Result<(Arc<V>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Arc<V>, E>>,
    {
        if let Some(value) = self.acquire_existing(&key) {
            return Ok((value, true));
        }

        let slot = KeyedLock::new(&self.build_locks, key.clone());
        let _guard = slot.lock().await;

        // Another caller may have finished the build while we waited
        if let Some(value) = self.acquire_existing(&key) {
            return Ok((value, true));
        }

        let value = build().await?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                key.clone(),
                CacheEntry {
                    value: Arc::clone(&value),
                    refs: 1,
                },
            );
        info!(cache = self.name, key = %key, "Created shared resource");
        Ok((value, false))
    }

    fn acquire_existing(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get_mut(key)?;
        entry.refs += 1;
        debug!(cache = self.name, key = %key, refs = entry.refs, "Reusing shared resource");
        Some(Arc::clone(&entry.value))
    }

    /// Add a reference to an existing entry. Returns false for unknown keys.
    pub fn increment_ref(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) => {
                entry.refs += 1;
                debug!(cache = self.name, key = %key, refs = entry.refs, "Incremented ref");
                true
            }
            None => false,
        }
    }

    /// Drop a reference. Returns true when this removed the entry.
    ///
    /// Unknown keys are a no-op.
    pub async fn decrement_ref(&self, key: &K) -> bool {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = entries.get_mut(key) else {
                debug!(cache = self.name, key = %key, "Decrement on unknown key ignored");
                return false;
            };

            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                debug!(cache = self.name, key = %key, refs = entry.refs, "Decremented ref");
                None
            } else {
                entries.remove(key).map(|entry| entry.value)
            }
        };

        match removed {
            Some(value) => {
                info!(cache = self.name, key = %key, "Removing shared resource (refs=0)");
                if let Err(e) = value.release().await {
                    error!(cache = self.name, key = %key, error = %e, "Release hook failed");
                }
                true
            }
            None => false,
        }
    }

    /// Current reference count of `key`
    #[must_use]
    pub fn ref_count(&self, key: &K) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| entry.refs)
    }

    /// Peek at a cached value without taking a reference
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry and reference statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let total_refs: usize = entries.values().map(|entry| entry.refs).sum();
        CacheStats {
            entries: entries.len(),
            total_refs,
            avg_refs: if entries.is_empty() {
                0.0
            } else {
                total_refs as f64 / entries.len() as f64
            },
        }
    }

    /// Remove every entry regardless of its count, invoking each release hook.
    ///
    /// Returns the number of entries drained.
    pub async fn cleanup(&self) -> usize {
        let drained: Vec<(K, Arc<V>)> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect();

        for (key, value) in &drained {
            if let Err(e) = value.release().await {
                error!(cache = self.name, key = %key, error = %e, "Release hook failed during cleanup");
            }
        }

        info!(cache = self.name, count = drained.len(), "Cleaned up shared resources");
        drained.len()
    }
}

impl<K, V: ?Sized> fmt::Debug for SharedResourceCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResourceCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
