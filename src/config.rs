//! Configuration Module
//!
//! Loads client configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheLimits;

/// Client configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend project
    pub backend_url: String,
    /// Public (anon) API key sent with every request
    pub anon_key: String,
    /// Entry limit of the shared cache, 0 for unbounded
    pub cache_max_entries: usize,
    /// Byte limit of the shared cache, 0 for unbounded
    pub cache_max_bytes: usize,
    /// Default expiration of cache entries
    pub cache_default_ttl: Duration,
    /// Interval of the background session refresh
    pub session_refresh_interval: Duration,
    /// Timeout applied to every backend HTTP request
    pub http_timeout: Duration,
    /// Location of the local preference file; platform default when unset
    pub preferences_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `WHOAMI_BACKEND_URL` - Backend base URL (default: http://localhost:54321)
    /// - `WHOAMI_ANON_KEY` - Public API key (default: empty)
    /// - `WHOAMI_CACHE_MAX_ENTRIES` - Cache entry limit, 0 = unbounded (default: 0)
    /// - `WHOAMI_CACHE_MAX_BYTES` - Cache byte limit, 0 = unbounded (default: 0)
    /// - `WHOAMI_CACHE_DEFAULT_TTL` - Default entry lifetime in seconds (default: 300)
    /// - `WHOAMI_SESSION_REFRESH_INTERVAL` - Session refresh period in seconds (default: 300)
    /// - `WHOAMI_HTTP_TIMEOUT` - Request timeout in seconds (default: 30)
    /// - `WHOAMI_PREFERENCES_PATH` - Preference file path (default: platform config dir)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend_url: env::var("WHOAMI_BACKEND_URL").unwrap_or(defaults.backend_url),
            anon_key: env::var("WHOAMI_ANON_KEY").unwrap_or(defaults.anon_key),
            cache_max_entries: parse_var("WHOAMI_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            cache_max_bytes: parse_var("WHOAMI_CACHE_MAX_BYTES").unwrap_or(defaults.cache_max_bytes),
            cache_default_ttl: parse_var("WHOAMI_CACHE_DEFAULT_TTL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_default_ttl),
            session_refresh_interval: parse_var("WHOAMI_SESSION_REFRESH_INTERVAL")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_refresh_interval),
            http_timeout: parse_var("WHOAMI_HTTP_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            preferences_path: env::var("WHOAMI_PREFERENCES_PATH").ok().map(PathBuf::from),
        }
    }

    /// Cache limits derived from the two size settings.
    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: (self.cache_max_entries > 0).then_some(self.cache_max_entries),
            max_bytes: (self.cache_max_bytes > 0).then_some(self.cache_max_bytes),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            cache_max_entries: 0,
            cache_max_bytes: 0,
            cache_default_ttl: Duration::from_secs(300),
            session_refresh_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            preferences_path: None,
        }
    }
}
