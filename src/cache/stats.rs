//! Cache Statistics Module
//!
//! Counters for hits, misses, evictions and swallowed codec failures.

use serde::Serialize;

// == Cache Stats ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that found nothing usable (absent, expired or undecodable)
    pub misses: u64,
    /// Entries dropped because a read found them expired
    pub expirations: u64,
    /// Entries dropped to stay within the configured limits
    pub evictions: u64,
    /// Encode or decode failures treated as misses
    pub codec_failures: u64,
    /// Current number of entries, expired ones included
    pub total_entries: usize,
    /// Current encoded size of all entries
    pub total_bytes: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_codec_failure(&mut self) {
        self.codec_failures += 1;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_at_zero() {
        let stats = CacheStats::new();
        assert_eq!(stats, CacheStats::default());
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_counters_are_independent() {
        let mut stats = CacheStats::new();
        stats.record_expiration();
        stats.record_eviction();
        stats.record_eviction();
        stats.record_codec_failure();

        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.codec_failures, 1);
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
