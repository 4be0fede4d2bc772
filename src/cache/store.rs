//! Cache Store Module
//!
//! Untyped storage engine: HashMap of encoded entries, lazy expiration on read,
//! optional LRU eviction when limits are configured.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, RecencyIndex};
use crate::error::CacheError;

// == Cache Limits ==
/// Capacity limits. `None` on both fields gives an unbounded store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of entries
    pub max_entries: Option<usize>,
    /// Maximum total encoded size in bytes
    pub max_bytes: Option<usize>,
}

impl CacheLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_bytes: Some(max_bytes),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.max_bytes.is_some()
    }
}

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    recency: RecencyIndex,
    stats: CacheStats,
    limits: CacheLimits,
    default_ttl: Duration,
    total_bytes: usize,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(limits: CacheLimits, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            recency: RecencyIndex::new(),
            stats: CacheStats::new(),
            limits,
            default_ttl,
            total_bytes: 0,
        }
    }

    /// Unbounded store with the given default expiration.
    pub fn unbounded(default_ttl: Duration) -> Self {
        Self::new(CacheLimits::unbounded(), default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // == Set ==
    /// Stores an encoded value, replacing any prior entry at `key`.
    ///
    /// In bounded mode the least recently used entries are evicted until the
    /// new entry fits. A value larger than the whole byte budget is rejected
    /// and the prior entry at the key is dropped, so reads miss.
    pub fn set(&mut self, key: String, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        if let Some(limit) = self.limits.max_bytes {
            if value.len() > limit {
                self.remove_entry(&key);
                return Err(CacheError::ValueTooLarge {
                    key,
                    size: value.len(),
                    limit,
                });
            }
        }

        self.remove_entry(&key);

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        self.make_room(entry.size_bytes());

        self.total_bytes += entry.size_bytes();
        self.entries.insert(key.clone(), entry);
        if self.limits.is_bounded() {
            self.recency.touch(&key);
        }
        Ok(())
    }

    // == Get ==
    /// Returns the encoded value if present and fresh.
    ///
    /// Expired entries are removed here; this is the only place expiration is
    /// enforced.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            debug!(key = %key, "Cache entry expired on read");
            self.remove_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        if self.limits.is_bounded() {
            self.recency.touch(key);
        }
        self.stats.record_hit();
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    // == Remove ==
    /// Deletes the entry at `key`; returns whether one was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    /// Deletes every entry whose key starts with `prefix`.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            self.remove_entry(key);
        }
        keys.len()
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.total_bytes = 0;
    }

    /// Counts a codec failure reported by the typed layer as a miss.
    pub fn record_codec_failure(&mut self) {
        self.stats.record_codec_failure();
    }

    /// Converts the hit recorded by `get` into a miss when the typed layer
    /// could not decode the value it returned.
    pub fn reclassify_hit_as_miss(&mut self) {
        self.stats.hits = self.stats.hits.saturating_sub(1);
        self.stats.record_miss();
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.total_entries = self.entries.len();
        stats.total_bytes = self.total_bytes;
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_bytes -= entry.size_bytes();
                self.recency.remove(key);
                true
            }
            None => false,
        }
    }

    fn make_room(&mut self, incoming_bytes: usize) {
        loop {
            let over_count = self
                .limits
                .max_entries
                .is_some_and(|max| self.entries.len() >= max);
            let over_bytes = self
                .limits
                .max_bytes
                .is_some_and(|max| self.total_bytes + incoming_bytes > max);
            if !over_count && !over_bytes {
                return;
            }
            match self.recency.pop_oldest() {
                Some(victim) => {
                    if let Some(entry) = self.entries.remove(&victim) {
                        self.total_bytes -= entry.size_bytes();
                    }
                    self.stats.record_eviction();
                    debug!(key = %victim, "Evicted least recently used cache entry");
                }
                None => return,
            }
        }
    }
}
