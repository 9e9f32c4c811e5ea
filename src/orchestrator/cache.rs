//! Result cache: LRU-bounded with per-entry TTL.
//!
//! The only mutable process-wide state in the engine. Entries are
//! immutable [`Arc`] snapshots keyed by the normalized query, the active
//! filters, and the reranker flag.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::core::SearchFilters;

use super::response::AnswerBundle;
use std::sync::Arc;

/// Cache key: everything that changes the retrieval outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Normalized query text.
    pub query: String,
    /// Active post-filters.
    pub filters: SearchFilters,
    /// Whether the reranker ran.
    pub use_reranker: bool,
}

struct CacheEntry {
    inserted: Instant,
    bundle: Arc<AnswerBundle>,
}

/// TTL + LRU result cache.
pub struct ResultCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    /// Creates a cache with the given capacity and TTL.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the cached bundle when present and fresh.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AnswerBundle>> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        let expired = match entries.get(key) {
            Some(entry) => {
                if entry.inserted.elapsed() <= self.ttl {
                    return Some(Arc::clone(&entry.bundle));
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Inserts a snapshot, evicting the least recently used entry at
    /// capacity.
    pub fn insert(&self, key: CacheKey, bundle: Arc<AnswerBundle>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key,
                CacheEntry {
                    inserted: Instant::now(),
                    bundle,
                },
            );
        }
    }

    /// Number of live entries (expired entries may still be counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Returns `true` when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
