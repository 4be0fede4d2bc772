//! Shared typed cache handle
//!
//! The one cache instance of the process. Created at the composition root and
//! cloned into every service that wants it.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{AsCacheKey, CacheKey, CacheLimits, CacheStats, CacheStore};
use crate::config::Config;

/// Thread-safe, typed view over a [`CacheStore`].
///
/// Values are encoded as JSON. Codec failures never reach the caller: a value
/// that cannot be encoded is not stored, and a stored value that cannot be
/// decoded into the requested type is dropped and reported as a miss.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Arc<Mutex<CacheStore>>,
}

impl Cache {
    pub fn new(limits: CacheLimits, default_ttl: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(CacheStore::new(limits, default_ttl))),
        }
    }

    /// Builds the cache from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_limits(), config.cache_default_ttl)
    }

    // == Get ==
    /// Returns the value at `key` if present, fresh and decodable as `T`.
    pub async fn get<T, K>(&self, key: &K) -> Option<T>
    where
        T: DeserializeOwned,
        K: AsCacheKey + ?Sized,
    {
        let key = key.cache_key();
        let mut store = self.store.lock().await;
        let encoded = match store.get(&key) {
            Some(encoded) => encoded,
            None => {
                debug!(key = %key, "Cache miss");
                return None;
            }
        };

        match serde_json::from_str::<T>(&encoded) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache decode failed, treating as miss");
                store.remove(&key);
                store.reclassify_hit_as_miss();
                store.record_codec_failure();
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` at `key` with the default expiration.
    pub async fn set<T, K>(&self, key: &K, value: &T)
    where
        T: Serialize + ?Sized,
        K: AsCacheKey + ?Sized,
    {
        self.store_value(key.cache_key(), value, None).await;
    }

    /// Stores `value` at `key`, fresh for `expires_in`.
    pub async fn set_with_ttl<T, K>(&self, key: &K, value: &T, expires_in: Duration)
    where
        T: Serialize + ?Sized,
        K: AsCacheKey + ?Sized,
    {
        self.store_value(key.cache_key(), value, Some(expires_in)).await;
    }

    async fn store_value<T>(&self, key: String, value: &T, ttl: Option<Duration>)
    where
        T: Serialize + ?Sized,
    {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache encode failed, value not stored");
                self.store.lock().await.record_codec_failure();
                return;
            }
        };

        let mut store = self.store.lock().await;
        if let Err(e) = store.set(key.clone(), encoded, ttl) {
            warn!(key = %key, error = %e, "Cache rejected value");
            return;
        }
        debug!(key = %key, "Cache set");
    }

    // == Remove ==
    /// Deletes the entry at `key`; absent keys are ignored.
    pub async fn remove<K>(&self, key: &K)
    where
        K: AsCacheKey + ?Sized,
    {
        let key = key.cache_key();
        if self.store.lock().await.remove(&key) {
            debug!(key = %key, "Cache entry removed");
        }
    }

    /// Deletes every entry of `resource`, whatever its id.
    pub async fn invalidate_resource(&self, resource: &str) -> usize {
        let removed = self
            .store
            .lock()
            .await
            .remove_prefix(&CacheKey::resource_prefix(resource));
        debug!(resource = %resource, removed, "Cache resource invalidated");
        removed
    }

    // == Clear ==
    pub async fn clear(&self) {
        self.store.lock().await.clear();
        debug!("Cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.lock().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Course {
        id: String,
        title: String,
    }

    fn cache() -> Cache {
        Cache::new(CacheLimits::unbounded(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_typed_roundtrip_with_composite_key() {
        let cache = cache();
        let course = Course {
            id: "c1".into(),
            title: "Breathing basics".into(),
        };
        let key = CacheKey::new("courses", "c1");

        cache.set(&key, &course).await;
        let cached: Option<Course> = cache.get(&key).await;

        assert_eq!(cached, Some(course));
    }

    #[tokio::test]
    async fn test_decode_failure_is_a_miss() {
        let cache = cache();
        cache.set("k", &vec!["a", "b"]).await;

        let wrong: Option<u32> = cache.get("k").await;
        assert!(wrong.is_none());

        // Corrupt entry is dropped
        let right: Option<Vec<String>> = cache.get("k").await;
        assert!(right.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.codec_failures, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_encode_failure_stores_nothing() {
        let cache = cache();
        // JSON object keys must be strings
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        cache.set("k", &bad).await;

        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.codec_failures, 1);
    }

    #[tokio::test]
    async fn test_oversize_overwrite_reads_as_miss() {
        let cache = Cache::new(CacheLimits::bounded(10, 16), Duration::from_secs(300));
        cache.set("profile", &"old").await;

        cache.set("profile", &"a value well past sixteen bytes").await;

        assert_eq!(cache.get::<String, _>("profile").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_absent_key_is_silent() {
        let cache = cache();
        cache.remove("missing").await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_resource() {
        let cache = cache();
        cache.set(&CacheKey::lessons("c1"), &1).await;
        cache.set(&CacheKey::lessons("c2"), &2).await;
        cache.set(&CacheKey::courses(), &3).await;

        assert_eq!(cache.invalidate_resource("lessons").await, 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_one_store() {
        let cache = cache();
        let other = cache.clone();

        cache.set("shared", &7u32).await;
        assert_eq!(other.get::<u32, _>("shared").await, Some(7));

        other.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = cache();
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(&format!("k{}", i), &i).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 32);
    }
}
