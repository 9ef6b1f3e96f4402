//! Content cache.
//!
//! Generation is expensive and idempotent, so identical requests are served
//! from a cache keyed on the request's canonical form:
//!
//! - [`CacheBackend`] is the storage seam. [`MemoryCacheBackend`] is the
//!   exact reference implementation (lazy expiry, oldest-first eviction);
//!   [`MokaCacheBackend`] trades exact eviction order for moka's
//!   concurrent TinyLFU cache.
//! - [`CacheKey`] builds the stable key string
//!   `content:{version}:{template_id}:{style_profile}:{model_name}:{param_hash}`.
//! - [`ContentCacheManager`] composes a backend with key construction and
//!   the default TTL (cache-aside helpers used before and after generation).
//! - [`CachingHandler`] wraps a generation [`TaskHandler`](crate::jobs::TaskHandler)
//!   so workers consult and fill the cache themselves.

pub mod content;
pub mod handler;
pub mod key;
pub mod manager;
pub mod memory;
pub mod moka_backend;

pub use content::{CachedContent, GeneratedContent, GenerationRequest};
pub use handler::CachingHandler;
pub use key::{CacheKey, canonical_json};
pub use manager::ContentCacheManager;
pub use memory::MemoryCacheBackend;
pub use moka_backend::MokaCacheBackend;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default schema version embedded in cache keys.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Key/value store for generated content.
///
/// Every operation is atomic per key: a `get` racing a `set` or `delete`
/// on the same key observes either the old or the new state, never a mix.
/// Expired entries are never returned.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Look up an entry, counting a hit or a miss. An expired entry is a
    /// miss and is removed.
    async fn get(&self, key: &str) -> Result<Option<CachedContent>>;

    /// Store an entry, replacing any previous one under `key`.
    ///
    /// `ttl` overrides `content.expires_at` (counted from now); with `None`
    /// the content's own expiry is kept. Inserting a new key into a full
    /// cache evicts one entry first.
    async fn set(&self, key: &str, content: CachedContent, ttl: Option<Duration>) -> Result<()>;

    /// Whether a live entry exists. Does not count as a hit.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove an entry. Returns true if one was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry. Hit and miss counters are kept.
    async fn clear(&self) -> Result<()>;

    async fn stats(&self) -> Result<CacheStats>;
}

/// Point-in-time backend statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: u64,
    pub capacity: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits, or 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Configuration for the content cache.
///
/// ```rust
/// # use huginn::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Some(Duration::from_secs(3600)))
///     .version("v2");
/// assert_eq!(config.max_entries, 500);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 1,000.
    pub max_entries: u64,
    /// Default time-to-live for new entries; `None` never expires.
    /// Default: 24 hours.
    pub ttl: Option<Duration>,
    /// Schema version embedded in every key. Bumping it invalidates all
    /// existing entries. Default: `"v1"`.
    pub version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Some(Duration::from_secs(24 * 60 * 60)),
            version: DEFAULT_CACHE_VERSION.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live (`None` = never expire).
    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the key schema version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}
