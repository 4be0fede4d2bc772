//! Cache key schema
//!
//! Every feature builds its keys here so the same resource always lands on the
//! same key. Format: `v{VERSION}:{resource}:{id}`.

use std::fmt;

/// Schema version, bumped when a cached shape changes incompatibly.
pub const CACHE_VERSION: u32 = 1;

/// Id used for whole-collection entries of a resource.
pub const ALL: &str = "all";

/// Composite `(resource, id)` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    id: String,
}

impl CacheKey {
    pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Key for a whole collection of `resource`.
    pub fn collection(resource: impl Into<String>) -> Self {
        Self::new(resource, ALL)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prefix shared by every key of `resource`.
    pub fn resource_prefix(resource: &str) -> String {
        format!("v{}:{}:", CACHE_VERSION, resource)
    }

    // ============= Feature keys =============

    /// Notifications of one user
    pub fn notifications(user_id: &str) -> Self {
        Self::new("notifications", user_id)
    }

    /// Published course catalogue
    pub fn courses() -> Self {
        Self::collection("courses")
    }

    /// Lessons of one course
    pub fn lessons(course_id: &str) -> Self {
        Self::new("lessons", course_id)
    }

    /// Test definitions with their questions
    pub fn tests() -> Self {
        Self::collection("tests")
    }

    /// Latest weekly columns, keyed by page size
    pub fn weekly_columns(limit: usize) -> Self {
        Self::new("weekly_columns", format!("latest_{}", limit))
    }

    pub fn profile(user_id: &str) -> Self {
        Self::new("profiles", user_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}:{}:{}", CACHE_VERSION, self.resource, self.id)
    }
}

/// Anything usable as a cache key: composite keys and plain strings.
pub trait AsCacheKey {
    fn cache_key(&self) -> String;
}

impl AsCacheKey for CacheKey {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl AsCacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl AsCacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = CacheKey::new("courses", "42");
        assert_eq!(key.to_string(), "v1:courses:42");
        assert_eq!(key.resource(), "courses");
        assert_eq!(key.id(), "42");
    }

    #[test]
    fn test_collection_key() {
        assert_eq!(CacheKey::courses().to_string(), "v1:courses:all");
        assert_eq!(CacheKey::tests().id(), ALL);
    }

    #[test]
    fn test_resource_prefix_matches_keys() {
        let prefix = CacheKey::resource_prefix("lessons");
        assert!(CacheKey::lessons("c1").to_string().starts_with(&prefix));
        assert!(!CacheKey::courses().to_string().starts_with(&prefix));
    }

    #[test]
    fn test_plain_string_keys_pass_through() {
        assert_eq!("notifications".cache_key(), "notifications");
        assert_eq!(String::from("x").cache_key(), "x");
    }
}
