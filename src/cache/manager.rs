//! Cache-aside helpers over a [`CacheBackend`].

use std::sync::Arc;

use tracing::debug;

use super::content::{CachedContent, GeneratedContent, GenerationRequest, expiry_after};
use super::key::CacheKey;
use super::memory::MemoryCacheBackend;
use super::{CacheBackend, CacheConfig, CacheStats};
use crate::Result;

/// Composes a backend with key construction and the default TTL.
///
/// Producers call [`get_cached`](Self::get_cached) before submitting work
/// and [`cache_result`](Self::cache_result) once generation succeeded.
#[derive(Clone)]
pub struct ContentCacheManager {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl ContentCacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    /// Manager over a [`MemoryCacheBackend`] sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryCacheBackend::new(config.max_entries));
        Self::new(backend, config)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, request: &GenerationRequest) -> CacheKey {
        request.cache_key(&self.config.version)
    }

    pub async fn get_cached(&self, request: &GenerationRequest) -> Result<Option<CachedContent>> {
        let key = self.key_for(request).to_string();
        let found = self.backend.get(&key).await?;
        debug!(key = %key, hit = found.is_some(), "cache lookup");
        Ok(found)
    }

    /// Store a successful generation under the request's key with the
    /// configured TTL. Returns the stored entry.
    pub async fn cache_result(
        &self,
        request: &GenerationRequest,
        generated: GeneratedContent,
    ) -> Result<CachedContent> {
        let key = self.key_for(request).to_string();
        let mut content = generated.into_cached(key.clone());
        content.expires_at = self.config.ttl.and_then(expiry_after);
        self.backend
            .set(&key, content.clone(), self.config.ttl)
            .await?;
        debug!(key = %key, "cached generated content");
        Ok(content)
    }

    /// Drop the entry for `request`. Returns true if one was present.
    pub async fn invalidate(&self, request: &GenerationRequest) -> Result<bool> {
        let key = self.key_for(request).to_string();
        self.backend.delete(&key).await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.backend.stats().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("blog", "concise", "gpt-4").with_parameter("length", 500)
    }

    #[tokio::test]
    async fn cache_aside_round() {
        let cache = ContentCacheManager::in_memory(CacheConfig::new().max_entries(8));
        assert!(cache.get_cached(&request()).await.unwrap().is_none());

        let stored = cache
            .cache_result(&request(), GeneratedContent::new("hello", "gpt-4").with_tokens_used(12))
            .await
            .unwrap();
        assert_eq!(stored.cache_key, cache.key_for(&request()).to_string());
        assert!(stored.expires_at.is_some());

        let hit = cache.get_cached(&request()).await.unwrap().unwrap();
        assert_eq!(hit.content, "hello");
        assert_eq!(hit.tokens_used, Some(12));
        assert_eq!(hit.hit_count, 1);

        assert!(cache.invalidate(&request()).await.unwrap());
        assert!(cache.get_cached(&request()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_ttl_never_expires() {
        let cache = ContentCacheManager::in_memory(CacheConfig::new().ttl(None));
        let stored = cache
            .cache_result(&request(), GeneratedContent::new("hello", "gpt-4"))
            .await
            .unwrap();
        assert!(stored.expires_at.is_none());
    }

    #[tokio::test]
    async fn version_bump_misses() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new(8));
        let v1 = ContentCacheManager::new(backend.clone(), CacheConfig::new());
        let v2 = ContentCacheManager::new(
            backend,
            CacheConfig::new()
                .version("v2")
                .ttl(Some(Duration::from_secs(60))),
        );
        v1.cache_result(&request(), GeneratedContent::new("old", "gpt-4"))
            .await
            .unwrap();
        assert!(v2.get_cached(&request()).await.unwrap().is_none());
    }
}
