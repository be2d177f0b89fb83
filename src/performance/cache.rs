//! Bounded result cache for expensive mail operations
//!
//! Keys are opaque strings built by the caller (see
//! `processor::fetch_cache_key`). The cache holds at most `max_size` entries; inserting
//! a new key into a full cache evicts the least recently used one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Default number of cached results
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Cache statistics for monitoring performance
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_requests: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Cached value with its recency stamp
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

/// Everything guarded by the cache lock
///
/// Values and recency live in one map so a reader can never see one without
/// the other.
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Logical clock; strictly increasing, so recency never ties
    clock: u64,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone())?;

        self.entries.remove(&oldest);
        self.stats.evictions += 1;
        Some(oldest)
    }
}

/// Thread-safe LRU cache bounded by entry count
pub struct ResultCache<V> {
    state: Mutex<CacheState<V>>,
    max_size: usize,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `max_size` entries (at least one)
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cached value, refreshing its recency
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.lock();
        let now = state.tick();
        state.stats.total_requests += 1;

        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = now;
                let value = entry.value.clone();
                state.stats.hits += 1;
                debug!("Cache hit for key: {}", key);
                Some(value)
            }
            None => {
                state.stats.misses += 1;
                debug!("Cache miss for key: {}", key);
                None
            }
        }
    }

    /// Insert or overwrite a value
    ///
    /// Overwriting never evicts. A new key in a full cache first evicts the
    /// least recently used entry.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut state = self.lock();
        let now = state.tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            if let Some(evicted) = state.evict_least_recent() {
                debug!("Evicted cache entry {} to make room for {}", evicted, key);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: now,
            },
        );
    }

    /// Remove a single entry; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry whose key contains `pattern`
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - state.entries.len();

        if removed > 0 {
            info!("Invalidated {} cache entries matching: {}", removed, pattern);
        }
        removed
    }

    /// Empty the cache
    pub fn clear(&self) {
        let mut state = self.lock();
        let removed = state.entries.len();
        state.entries.clear();
        if removed > 0 {
            info!("Cleared {} cached results", removed);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Alias of `len`
    pub fn size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}
