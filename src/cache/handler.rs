//! Cache-aware decorator for generation handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::content::{GeneratedContent, GenerationRequest};
use super::manager::ContentCacheManager;
use crate::jobs::{HandlerResult, Job, TaskContext, TaskHandler};

/// Metadata flag set on results served from the cache.
pub const CACHE_HIT_KEY: &str = "cache_hit";

/// Wraps a generation handler with cache-aside lookups.
///
/// The job's parameters must hold a [`GenerationRequest`]. A cache hit is
/// returned without running the inner handler; a successful inner result
/// that deserializes as [`GeneratedContent`] is stored. Cache failures are
/// logged and never fail the job.
pub struct CachingHandler<H> {
    inner: H,
    cache: Arc<ContentCacheManager>,
}

impl<H: TaskHandler> CachingHandler<H> {
    pub fn new(inner: H, cache: Arc<ContentCacheManager>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for CachingHandler<H> {
    async fn run(&self, job: &Job, ctx: TaskContext) -> HandlerResult {
        let request = GenerationRequest::from_parameters(&job.parameters)?;

        match self.cache.get_cached(&request).await {
            Ok(Some(hit)) => {
                debug!(job_id = %job.id, key = %hit.cache_key, "serving generation from cache");
                ctx.report_progress(100.0, None).await;
                let mut generated = GeneratedContent::from(&hit);
                generated
                    .metadata
                    .insert(CACHE_HIT_KEY.to_owned(), Value::Bool(true));
                return Ok(serde_json::to_value(generated)?);
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "cache lookup failed, generating"),
        }

        let output = self.inner.run(job, ctx).await?;

        match serde_json::from_value::<GeneratedContent>(output.clone()) {
            Ok(generated) => {
                if let Err(e) = self.cache.cache_result(&request, generated).await {
                    warn!(job_id = %job.id, error = %e, "failed to cache generated content");
                }
            }
            Err(e) => {
                debug!(job_id = %job.id, error = %e, "handler output is not generated content, not caching");
            }
        }
        Ok(output)
    }
}
