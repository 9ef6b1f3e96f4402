//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `task`: task name the job was submitted under
//! - `status`: terminal outcome: "completed", "failed" or "cancelled"
//! - `operation`: storage operation (e.g. "dequeue", "complete")
//! - `backend`: cache backend name ("memory" | "moka")

/// Total jobs accepted by the queue.
///
/// Labels: `task`, `priority`.
pub const JOBS_SUBMITTED_TOTAL: &str = "huginn_jobs_submitted_total";

/// Total jobs that reached a terminal status.
///
/// Labels: `task`, `status`.
pub const JOBS_FINISHED_TOTAL: &str = "huginn_jobs_finished_total";

/// Total job requeues after a failed attempt.
///
/// Labels: `task`.
pub const JOB_RETRIES_TOTAL: &str = "huginn_job_retries_total";

/// Total handler attempts that exceeded their timeout.
///
/// Labels: `task`.
pub const JOB_TIMEOUTS_TOTAL: &str = "huginn_job_timeouts_total";

/// Wall-clock duration of a single handler attempt in seconds.
///
/// Labels: `task`.
pub const JOB_DURATION_SECONDS: &str = "huginn_job_duration_seconds";

/// Number of jobs waiting in the pending ordering.
pub const QUEUE_DEPTH: &str = "huginn_queue_depth";

/// Total storage operations retried after a transient backend error.
///
/// Labels: `operation`.
pub const STORAGE_RETRIES_TOTAL: &str = "huginn_storage_retries_total";

/// Total content cache hits.
///
/// Labels: `backend`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total content cache misses (including lazily expired entries).
///
/// Labels: `backend`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total entries evicted to stay within capacity.
///
/// Labels: `backend`.
pub const CACHE_EVICTIONS_TOTAL: &str = "huginn_cache_evictions_total";
