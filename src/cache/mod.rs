//! Cache Module
//!
//! Process-wide key/value cache of time-stamped entries with lazy expiration
//! and optional LRU bounds.

mod entry;
mod keys;
mod lru;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use keys::{AsCacheKey, CacheKey, ALL, CACHE_VERSION};
pub use lru::RecencyIndex;
pub use shared::Cache;
pub use stats::CacheStats;
pub use store::{CacheLimits, CacheStore};
