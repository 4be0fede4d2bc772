//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with expiration support.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// A stored value paired with its creation time and expiration window.
///
/// The value is kept as JSON text; the typed layer in [`super::Cache`]
/// encodes on write and decodes on read.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Encoded value
    pub value: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// How long the entry stays fresh after creation
    pub expires_in: Duration,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(value: String, expires_in: Duration) -> Self {
        Self::with_timestamp(value, current_timestamp_ms(), expires_in)
    }

    /// Creates an entry with an explicit creation timestamp.
    pub fn with_timestamp(value: String, created_at: u64, expires_in: Duration) -> Self {
        Self {
            value,
            created_at,
            expires_in,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is expired only once the elapsed time is
    /// strictly greater than its window, so a zero-length window still serves
    /// a read made in the same millisecond it was written.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiration check against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.created_at);
        u128::from(elapsed) > self.expires_in.as_millis()
    }

    // == Time To Live ==
    /// Returns the remaining freshness window, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        let elapsed = Duration::from_millis(current_timestamp_ms().saturating_sub(self.created_at));
        self.expires_in.saturating_sub(elapsed)
    }

    /// Size charged against a byte-bounded cache.
    pub fn size_bytes(&self) -> usize {
        self.value.len()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as zero rather than panicking.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
