//! Recency Index Module
//!
//! Least-recently-used ordering for the bounded cache mode.

use std::collections::{BTreeMap, HashMap};

// == Recency Index ==
/// Tracks access order for LRU eviction.
///
/// Every touch stamps the key with a monotonically increasing tick. The
/// smallest tick is the least recently used key.
#[derive(Debug, Default)]
pub struct RecencyIndex {
    tick: u64,
    by_key: HashMap<String, u64>,
    by_tick: BTreeMap<u64, String>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &str) {
        self.tick += 1;
        if let Some(old) = self.by_key.insert(key.to_string(), self.tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.tick, key.to_string());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(old) = self.by_key.remove(key) {
            self.by_tick.remove(&old);
        }
    }

    // == Pop Oldest ==
    /// Removes and returns the least recently used key.
    pub fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_tick.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn peek_oldest(&self) -> Option<&str> {
        self.by_tick.values().next().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_tick.clear();
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
