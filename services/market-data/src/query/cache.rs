//! TTL cache of query results
//!
//! An entry is valid only while `now - stored_at < ttl`. Expired entries
//! are evicted when read, and purged in bulk when the cache is full.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use types::market::Symbol;

use crate::clock::elapsed_between;

/// `(symbols, source)` with the symbol list sorted and de-duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    symbols: Vec<Symbol>,
    source: String,
}

impl CacheKey {
    pub fn new(symbols: &[Symbol], source: &str) -> Self {
        let mut symbols = symbols.to_vec();
        symbols.sort();
        symbols.dedup();
        Self {
            symbols,
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

pub struct ResultCache<V> {
    ttl: Duration,
    max_entries: usize,
    entries: DashMap<CacheKey, CacheEntry<V>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if self.is_live(&entry, now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: CacheKey, value: V, now: DateTime<Utc>) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.purge_expired(now);
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, CacheEntry { value, stored_at: now });
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| elapsed_between(entry.stored_at, now) < self.ttl);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn is_live(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        elapsed_between(entry.stored_at, now) < self.ttl
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
