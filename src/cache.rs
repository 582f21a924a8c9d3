//! Time-bounded in-memory caches.
//!
//! Caches are plain objects owned by the composition root and passed by
//! reference; nothing in the crate holds a process-global cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A map whose entries expire after a fixed time-to-live.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    /// Entry lifetime.
    ttl: Duration,
    /// Entries with their insertion time.
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let expired = match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => {
                return Some(value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
        }
        None
    }

    /// Inserts or replaces an entry.
    pub fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (Instant::now(), value));
    }

    /// Drops every entry.
    pub fn invalidate(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drops every entry whose key matches the predicate.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| !predicate(key));
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
