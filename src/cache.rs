//! In-memory key/value cache with per-entry expiry.
//!
//! Used to memoize search results. Expired entries are evicted lazily on
//! lookup, and proactively by [`TtlCache::cleanup`], which
//! [`spawn_cleanup`] runs on a timer so keys nobody asks for again still
//! get reclaimed.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted) > self.ttl
    }
}

/// Snapshot of cache counters returned by [`TtlCache::stats`].
///
/// `keys` and `size` both report the current entry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub size: usize,
}

/// Key/value store where every entry expires `ttl` after insertion.
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create an empty cache whose entries live for `default_ttl` unless
    /// stored with [`set_with_ttl`](Self::set_with_ttl).
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            hits: 0,
            misses: 0,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key` with the default TTL, replacing any previous entry.
    pub fn set(&mut self, key: K, value: V) {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Look up a live entry, counting a hit or a miss.
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.evict_if_expired(key) {
            self.misses += 1;
            return None;
        }
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether a live entry exists. Does not touch the hit/miss counters.
    pub fn has<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        !self.evict_if_expired(key) && self.entries.contains_key(key)
    }

    /// Remove an entry. Returns `true` if one was present.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            keys: self.entries.len(),
            size: self.entries.len(),
        }
    }

    fn evict_if_expired<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()));
        if expired {
            self.entries.remove(key);
        }
        expired
    }
}

/// Cache key for a search query.
///
/// The query is trimmed and lower-cased so `"Bolt"` and `" bolt"` share a slot.
pub fn search_cache_key(query: &str, exact: bool) -> String {
    format!("{}:{}", query.trim().to_lowercase(), exact)
}

/// Run [`TtlCache::cleanup`] every `interval` on the current Tokio runtime.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_cleanup<K, V>(cache: Arc<Mutex<TtlCache<K, V>>>, interval: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = match cache.lock() {
                Ok(mut cache) => cache.cleanup(),
                Err(_) => {
                    log::warn!("Search cache lock poisoned; stopping cleanup task");
                    return;
                }
            };
            if evicted > 0 {
                log::debug!("Evicted {evicted} expired cache entries");
            }
        }
    })
}
