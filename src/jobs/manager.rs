//! Worker-pool lifecycle and submission APIs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::memory::MemoryJobQueue;
use super::policy::RetryPolicy;
use super::queue::JobQueue;
use super::registry::{TaskHandler, TaskRegistry};
use super::types::{
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS, Job, JobPriority, JobSnapshot, Metadata,
    QueueStats,
};
use super::worker::JobWorker;
use crate::cache::{CachedContent, ContentCacheManager, GenerationRequest};
use crate::retry::RetryConfig;
use crate::{HuginnError, Result};

/// Configuration for a [`JobManager`].
///
/// ```rust
/// # use huginn::jobs::JobManagerConfig;
/// # use std::time::Duration;
/// let config = JobManagerConfig::new()
///     .poll_interval(Duration::from_millis(100))
///     .default_max_retries(5);
/// assert_eq!(config.default_timeout_seconds, 300);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobManagerConfig {
    /// How long an idle worker sleeps before polling again. Default: 500ms.
    pub poll_interval: Duration,
    /// How long [`JobManager::stop`] waits for in-flight jobs. Default: 30s.
    pub shutdown_grace: Duration,
    /// Per-attempt handler timeout for jobs submitted without one.
    pub default_timeout_seconds: u64,
    /// Retry budget for jobs submitted without one.
    pub default_max_retries: u32,
    pub default_priority: JobPriority,
    /// Backoff for transient queue errors.
    pub storage_retry: RetryConfig,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(30),
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_priority: JobPriority::Normal,
            storage_retry: RetryConfig::default(),
        }
    }
}

impl JobManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn default_timeout_seconds(mut self, seconds: u64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }

    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn default_priority(mut self, priority: JobPriority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn storage_retry(mut self, retry: RetryConfig) -> Self {
        self.storage_retry = retry;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(HuginnError::Configuration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.default_timeout_seconds == 0 {
            return Err(HuginnError::Configuration(
                "default_timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Per-submission overrides. Unset fields fall back to the manager config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitOptions {
    pub priority: Option<JobPriority>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub metadata: Metadata,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of [`JobManager::submit_generation`].
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationTicket {
    /// Served from the cache; no job was created.
    Cached(CachedContent),
    /// Cache miss; the id of the queued job.
    Queued(String),
}

struct WorkerPool {
    shutdown: CancellationToken,
    halt: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the queue, the task registry, the retry policy and a pool of
/// workers.
///
/// ```rust,no_run
/// use huginn::jobs::{handler_fn, JobManager, SubmitOptions};
///
/// # async fn demo() -> huginn::Result<()> {
/// let manager = JobManager::new();
/// manager.register("echo", handler_fn(|job, _ctx| async move {
///     Ok(serde_json::Value::Object(job.parameters))
/// }))?;
/// manager.start(4).await?;
///
/// let id = manager.submit("echo", Default::default(), SubmitOptions::new()).await?;
/// let done = manager.wait_for(&id, std::time::Duration::from_secs(5)).await?;
/// println!("{}", done.status);
///
/// manager.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct JobManager {
    queue: Arc<dyn JobQueue>,
    registry: Arc<TaskRegistry>,
    policy: Arc<RetryPolicy>,
    config: JobManagerConfig,
    pool: Mutex<Option<WorkerPool>>,
}

impl JobManager {
    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::new()
    }

    /// Manager over a fresh [`MemoryJobQueue`] with default config.
    pub fn new() -> Self {
        let config = JobManagerConfig::default();
        Self::assemble(
            Arc::new(MemoryJobQueue::new()),
            Arc::new(TaskRegistry::new()),
            config,
        )
    }

    fn assemble(
        queue: Arc<dyn JobQueue>,
        registry: Arc<TaskRegistry>,
        config: JobManagerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            policy: Arc::new(RetryPolicy::new(config.storage_retry.clone())),
            config,
            pool: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    /// Register a handler for `task_name`. Works while workers run.
    pub fn register(
        &self,
        task_name: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<()> {
        self.registry.register(task_name, handler)
    }

    /// Build a job from `task_name`, `parameters` and `options` and queue it.
    ///
    /// The task does not have to be registered yet; a job whose handler is
    /// still missing when a worker claims it fails without retries.
    pub async fn submit(
        &self,
        task_name: impl Into<String>,
        parameters: Metadata,
        options: SubmitOptions,
    ) -> Result<String> {
        let mut job = Job::new(task_name, parameters)
            .with_priority(options.priority.unwrap_or(self.config.default_priority))
            .with_timeout_seconds(
                options
                    .timeout_seconds
                    .unwrap_or(self.config.default_timeout_seconds),
            )
            .with_max_retries(options.max_retries.unwrap_or(self.config.default_max_retries));
        job.metadata = options.metadata;
        self.submit_job(job).await
    }

    /// Queue a fully built job.
    pub async fn submit_job(&self, job: Job) -> Result<String> {
        self.queue.enqueue(job).await
    }

    /// Serve `request` from `cache`, or queue a `task_name` job for it.
    ///
    /// A failing cache lookup is logged and treated as a miss.
    pub async fn submit_generation(
        &self,
        cache: &ContentCacheManager,
        task_name: impl Into<String>,
        request: &GenerationRequest,
        options: SubmitOptions,
    ) -> Result<GenerationTicket> {
        match cache.get_cached(request).await {
            Ok(Some(hit)) => return Ok(GenerationTicket::Cached(hit)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache lookup failed, queueing generation"),
        }
        let parameters = request.to_parameters()?;
        let id = self.submit(task_name, parameters, options).await?;
        Ok(GenerationTicket::Queued(id))
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        self.queue.get_status(job_id).await
    }

    /// Cancel a pending or running job. Running handlers see their
    /// cancellation token fire and are expected to stop on their own.
    pub async fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        let cancelled = self.queue.cancel(job_id).await?;
        info!(job_id, "job cancelled");
        Ok(JobSnapshot::from(&cancelled))
    }

    /// Poll until `job_id` is terminal or `timeout` passes.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot> {
        tokio::time::timeout(timeout, self.poll_until_terminal(job_id))
            .await
            .map_err(|_| HuginnError::WaitTimedOut(job_id.to_owned()))?
    }

    async fn poll_until_terminal(&self, job_id: &str) -> Result<JobSnapshot> {
        loop {
            match self.queue.get_status(job_id).await? {
                None => return Err(HuginnError::JobNotFound(job_id.to_owned())),
                Some(snapshot) if snapshot.is_terminal() => return Ok(snapshot),
                Some(_) => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Spawn `workers` independent worker loops.
    pub async fn start(&self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(HuginnError::Validation(
                "worker count must be at least 1".into(),
            ));
        }
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(HuginnError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let halt = CancellationToken::new();
        let pool_id = uuid::Uuid::new_v4().simple().to_string();
        let handles = (0..workers)
            .map(|i| {
                let worker = JobWorker::new(
                    format!("worker-{}-{i}", &pool_id[..8]),
                    self.queue.clone(),
                    self.registry.clone(),
                    self.policy.clone(),
                    self.config.poll_interval,
                )
                .halt_on(halt.clone());
                let token = shutdown.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect();

        info!(workers, "worker pool started");
        *pool = Some(WorkerPool {
            shutdown,
            halt,
            handles,
        });
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Signal shutdown and wait up to the grace period for workers to finish
    /// their in-flight jobs.
    ///
    /// Jobs still running after that are interrupted: their cancellation
    /// tokens fire, their handlers are aborted and they are failed with
    /// [`HuginnError::WorkerShutdown`]. Does nothing if the pool is not
    /// running.
    pub async fn stop(&self) {
        let Some(WorkerPool {
            shutdown,
            halt,
            mut handles,
        }) = self.pool.lock().await.take()
        else {
            return;
        };

        shutdown.cancel();
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            let stragglers = handles.iter().filter(|h| !h.is_finished()).count();
            warn!(
                stragglers,
                grace_ms = grace.as_millis() as u64,
                "workers still busy after shutdown grace, interrupting jobs"
            );
            halt.cancel();
            if tokio::time::timeout(grace, join_all(handles.iter_mut()))
                .await
                .is_err()
            {
                error!("workers did not settle interrupted jobs, aborting");
                for handle in &handles {
                    handle.abort();
                }
            }
        }
        info!("worker pool stopped");
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.get_mut() {
            pool.shutdown.cancel();
        }
    }
}

/// Builder for [`JobManager`].
#[derive(Default)]
pub struct JobManagerBuilder {
    queue: Option<Arc<dyn JobQueue>>,
    registry: Option<Arc<TaskRegistry>>,
    config: JobManagerConfig,
}

impl JobManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom queue implementation. Default: [`MemoryJobQueue`].
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Share a registry with other components.
    pub fn registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: JobManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<JobManager> {
        self.config.validate()?;
        Ok(JobManager::assemble(
            self.queue
                .unwrap_or_else(|| Arc::new(MemoryJobQueue::new())),
            self.registry.unwrap_or_default(),
            self.config,
        ))
    }
}
