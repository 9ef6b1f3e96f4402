//! Huginn - job queue and content cache for generation workloads
//!
//! This crate coordinates expensive, idempotent content generation across
//! many concurrent requesters. It decides *when* a unit of work runs,
//! makes sure at most one worker runs it at a time, retries failed or
//! timed-out attempts within a bounded budget, and avoids repeating
//! identical work through a capacity- and time-bounded cache.
//!
//! # Jobs Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use huginn::jobs::{handler_fn, JobManager, JobPriority, SubmitOptions};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let manager = JobManager::new();
//!     manager.register("summarize", handler_fn(|job, ctx| async move {
//!         ctx.report_progress(50.0, None).await;
//!         Ok(serde_json::json!({ "words": job.parameters.len() }))
//!     }))?;
//!     manager.start(4).await?;
//!
//!     let id = manager
//!         .submit("summarize", Default::default(), SubmitOptions::new().priority(JobPriority::High))
//!         .await?;
//!     let done = manager.wait_for(&id, Duration::from_secs(30)).await?;
//!     println!("{} -> {:?}", done.status, done.result);
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Cache Example
//!
//! ```rust
//! use huginn::cache::{CacheConfig, ContentCacheManager, GeneratedContent, GenerationRequest};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> huginn::Result<()> {
//! let cache = ContentCacheManager::in_memory(CacheConfig::new().max_entries(100));
//! let request = GenerationRequest::new("blog-post", "concise", "gpt-4")
//!     .with_parameter("length", 500);
//!
//! if cache.get_cached(&request).await?.is_none() {
//!     let generated = GeneratedContent::new("...", "gpt-4");
//!     cache.cache_result(&request, generated).await?;
//! }
//! assert!(cache.get_cached(&request).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod retry;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheBackend, CacheConfig, CacheKey, CachedContent, ContentCacheManager};
pub use config::Config;
pub use error::{HuginnError, Result};
pub use jobs::{Job, JobManager, JobPriority, JobStatus, TaskHandler, TaskRegistry};
pub use retry::RetryConfig;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
