//! Autocomplete search with result caching and request supersession.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use crate::api::PackageApi;
use crate::cache::{self, search_cache_key, CacheStats, TtlCache};
use crate::error::{MtgvError, Result};

/// Card-name search backed by a [`TtlCache`].
///
/// Starting a search aborts the one still in flight, and a superseded
/// search resolves to `Ok(None)`, so a slow answer for an earlier keystroke
/// never replaces suggestions for a later one.
pub struct CardSearch {
    api: Arc<dyn PackageApi>,
    cache: Arc<Mutex<TtlCache<String, Vec<String>>>>,
    in_flight: Mutex<Option<AbortHandle>>,
    latest: AtomicU64,
}

impl CardSearch {
    pub fn new(api: Arc<dyn PackageApi>, ttl: Duration) -> Self {
        Self {
            api,
            cache: Arc::new(Mutex::new(TtlCache::new(ttl))),
            in_flight: Mutex::new(None),
            latest: AtomicU64::new(0),
        }
    }

    /// Search card names matching `query`.
    ///
    /// Returns `Ok(None)` when a newer search superseded this one before it
    /// finished. A blank query yields an empty list without a request.
    pub async fn search(&self, query: &str, exact: bool) -> Result<Option<Vec<String>>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let key = search_cache_key(query, exact);
        if let Some(hit) = self.lock_cache()?.get(&key) {
            self.cancel_in_flight();
            return Ok(Some(hit));
        }

        let api = Arc::clone(&self.api);
        let owned_query = query.to_string();
        let task: JoinHandle<Result<Vec<String>>> =
            tokio::spawn(async move { api.search_cards(&owned_query, exact).await });
        if let Ok(mut slot) = self.in_flight.lock() {
            if let Some(previous) = slot.replace(task.abort_handle()) {
                previous.abort();
            }
        }

        let names = match task.await {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => {
                log::debug!("Search for '{query}' superseded");
                return Ok(None);
            }
            Err(e) => {
                return Err(MtgvError::Transport(format!("Task join error: {e}")));
            }
        };

        self.lock_cache()?.set(key, names.clone());
        if self.latest.load(Ordering::SeqCst) != seq {
            return Ok(None);
        }
        Ok(Some(names))
    }

    /// Abort the in-flight search, if any.
    pub fn cancel_in_flight(&self) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|c| c.stats())
            .unwrap_or_default()
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Periodically evict expired results. Abort the handle to stop.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        cache::spawn_cleanup(Arc::clone(&self.cache), interval)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, TtlCache<String, Vec<String>>>> {
        self.cache
            .lock()
            .map_err(|_| MtgvError::Transport("Search cache lock poisoned".into()))
    }
}
