//! Bounded query-result cache with LRU eviction and optional expiry.
//!
//! Recency is tracked with a monotonically increasing access counter; the
//! entry with the smallest counter is evicted when the cache is full.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
    inserted: Instant,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

/// Keyed cache of cloned values. Not internally synchronised.
#[derive(Debug)]
pub struct QueryCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
    access_counter: u64,
    stats: CacheStats,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache holding at most `capacity` entries. A `ttl` of `None`
    /// (or zero) keeps entries until evicted.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity,
            ttl: ttl.filter(|d| !d.is_zero()),
            access_counter: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match (self.entries.get(key), self.ttl) {
            (Some(entry), Some(ttl)) => entry.inserted.elapsed() > ttl,
            _ => false,
        };
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            debug!(key, "Cache entry expired");
            return None;
        }

        let access = self.next_access();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = access;
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace `key`. Evicts the least recently used entry when a
    /// new key would exceed capacity.
    pub fn put(&mut self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let access = self.next_access();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: access,
                inserted: Instant::now(),
            },
        );
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            debug!(key = %key, "Evicted least recently used cache entry");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ..self.stats
        }
    }
}
