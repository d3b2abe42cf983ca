//! In-memory response store keyed by path and variant
//!
//! Backed by a sharded concurrent map, so lookups and inserts for unrelated
//! keys never contend on one lock and the sweeper can evict while requests
//! keep inserting.

use crate::types::{CacheKey, CachedEntry};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<CacheKey, Arc<CachedEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry; absence is a normal outcome
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store an entry, replacing whatever was there
    pub fn put(&self, key: CacheKey, entry: CachedEntry) -> Arc<CachedEntry> {
        let entry = Arc::new(entry);
        debug!(key = %key, size = entry.len(), "Cached response");
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }

    pub fn delete(&self, key: &CacheKey) -> Option<Arc<CachedEntry>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove every entry older than `max_age`, returning how many went
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if entry.age() > max_age {
                debug!(key = %key, age_secs = entry.age().as_secs(), "Evicting stale entry");
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of body bytes across all entries
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.value().len() as u64)
            .sum()
    }
}
