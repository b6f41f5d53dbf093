//! Bounded FIFO cache of per-source search results.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use crate::models::SearchResult;

pub const DEFAULT_SEARCH_CACHE_SIZE: usize = 100;

/// Cache key: SHA-256 over the source key and the trimmed, lower-cased query.
pub fn search_cache_key(source_key: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(query.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Vec<SearchResult>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// `(source, query) → results`, holding at most `capacity` entries.
///
/// Eviction is strict FIFO: when full, the single oldest-inserted entry is
/// dropped before a new one is added. Hits do not refresh an entry's
/// position. No staleness guarantee beyond "valid when inserted".
pub struct SearchCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl SearchCache {
    /// A capacity of `0` disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, source_key: &str, query: &str) -> Option<Vec<SearchResult>> {
        let key = search_cache_key(source_key, query);
        self.lock().map.get(&key).cloned()
    }

    pub fn put(&self, source_key: &str, query: &str, results: Vec<SearchResult>) {
        if self.capacity == 0 {
            return;
        }

        let key = search_cache_key(source_key, query);
        let mut entries = self.lock();

        if let Some(existing) = entries.map.get_mut(&key) {
            *existing = results;
            return;
        }

        while entries.map.len() >= self.capacity {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.map.remove(&oldest);
                }
                None => break,
            }
        }

        entries.order.push_back(key.clone());
        entries.map.insert(key, results);
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.map.clear();
        entries.order.clear();
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_CACHE_SIZE)
    }
}
