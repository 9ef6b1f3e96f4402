//! Cached entries and the generation request/response types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::CacheKey;
use crate::jobs::Metadata;
use crate::{HuginnError, Result};

/// A generated piece of content as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedContent {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of cache hits served from this entry.
    #[serde(default)]
    pub hit_count: u64,
    pub model_used: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    /// Generation latency in seconds.
    #[serde(default)]
    pub generation_time: Option<f64>,
    pub cache_key: String,
}

impl CachedContent {
    pub fn new(
        cache_key: impl Into<String>,
        content: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
            expires_at: None,
            hit_count: 0,
            model_used: model_used.into(),
            tokens_used: None,
            generation_time: None,
            cache_key: cache_key.into(),
        }
    }

    /// Expire `ttl` after now.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = expiry_after(ttl);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// `now + ttl`, or `None` if that is past the representable range.
pub(crate) fn expiry_after(ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
}

/// Everything that identifies one generation.
///
/// Serialized flat into a job's parameters by
/// [`JobManager::submit_generation`](crate::jobs::JobManager::submit_generation)
/// and read back by [`CachingHandler`](super::CachingHandler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub template_id: String,
    pub style_profile: String,
    #[serde(default)]
    pub parameters: Metadata,
    pub model_name: String,
}

impl GenerationRequest {
    pub fn new(
        template_id: impl Into<String>,
        style_profile: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            style_profile: style_profile.into(),
            parameters: Metadata::new(),
            model_name: model_name.into(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Metadata) -> Self {
        self.parameters = parameters;
        self
    }

    /// Key for this request under schema `version`.
    pub fn cache_key(&self, version: &str) -> CacheKey {
        CacheKey::new(
            self.template_id.clone(),
            self.style_profile.clone(),
            self.parameters.clone(),
            self.model_name.clone(),
        )
        .with_version(version)
    }

    /// Job parameters carrying this request.
    pub fn to_parameters(&self) -> Result<Metadata> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(HuginnError::Validation(
                "generation request did not serialize to an object".into(),
            )),
        }
    }

    /// Read a request back out of job parameters.
    pub fn from_parameters(parameters: &Metadata) -> Result<Self> {
        let request: Self = serde_json::from_value(Value::Object(parameters.clone()))?;
        if request.template_id.trim().is_empty() || request.model_name.trim().is_empty() {
            return Err(HuginnError::Validation(
                "generation request needs a template_id and a model_name".into(),
            ));
        }
        Ok(request)
    }
}

/// What a generation handler returns on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub model: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub generation_time: Option<f64>,
}

impl GeneratedContent {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
            model: model.into(),
            tokens_used: None,
            generation_time: None,
        }
    }

    pub fn with_tokens_used(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_generation_time(mut self, seconds: f64) -> Self {
        self.generation_time = Some(seconds);
        self
    }

    /// Entry to store under `cache_key`, created now.
    pub fn into_cached(self, cache_key: impl Into<String>) -> CachedContent {
        CachedContent {
            content: self.content,
            metadata: self.metadata,
            created_at: Utc::now(),
            expires_at: None,
            hit_count: 0,
            model_used: self.model,
            tokens_used: self.tokens_used,
            generation_time: self.generation_time,
            cache_key: cache_key.into(),
        }
    }
}

impl From<&CachedContent> for GeneratedContent {
    fn from(cached: &CachedContent) -> Self {
        Self {
            content: cached.content.clone(),
            metadata: cached.metadata.clone(),
            model: cached.model_used.clone(),
            tokens_used: cached.tokens_used,
            generation_time: cached.generation_time,
        }
    }
}
