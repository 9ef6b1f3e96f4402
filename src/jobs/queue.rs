//! The job queue trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{Job, JobResult, JobSnapshot, Metadata, QueueStats};
use crate::Result;

/// A job handed to exactly one worker for one execution attempt.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The job record as of the claim (status `Running`).
    pub job: Job,
    /// Triggered when the job is cancelled while running.
    pub cancellation: CancellationToken,
}

/// Persistent, priority-ordered job storage with exactly-once claims.
///
/// Implementations must make every method atomic per job: two concurrent
/// [`dequeue`](Self::dequeue) calls never return the same job, and two
/// completions for the same job id never both succeed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a new pending job and place it in the pending ordering.
    ///
    /// Returns the job id. Malformed jobs are rejected with
    /// [`HuginnError::Validation`](crate::HuginnError::Validation).
    async fn enqueue(&self, job: Job) -> Result<String>;

    /// Claim the highest-priority pending job (FIFO within a priority).
    ///
    /// The job becomes `Running` with `started_at`, `worker_id` stamped and
    /// progress reset to 0. Returns `None` when nothing is pending.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<ClaimedJob>>;

    /// Record progress for a running job.
    ///
    /// Progress is clamped to `[0, 100]` and never moves backwards within
    /// an attempt. Metadata keys overwrite earlier values. Updates for jobs
    /// that are no longer running are ignored.
    async fn update_progress(
        &self,
        job_id: &str,
        progress: f64,
        metadata: Option<Metadata>,
    ) -> Result<()>;

    /// Finish a running job as `Completed` or `Failed` depending on
    /// `result.success`. Returns the terminal record.
    async fn complete(&self, job_id: &str, result: JobResult) -> Result<Job>;

    /// Put a running job back in line after a failed attempt
    /// (`Running -> Retrying -> Pending`).
    ///
    /// Increments `retry_count`, resets progress, keeps the priority tier and
    /// assigns a fresh FIFO sequence number.
    async fn requeue(&self, job_id: &str, error: &str) -> Result<Job>;

    /// Cancel a pending or running job.
    ///
    /// Running jobs have their cancellation token triggered; the handler is
    /// expected to notice and stop on its own.
    async fn cancel(&self, job_id: &str) -> Result<Job>;

    /// Read-only view of a job, or `None` for unknown ids.
    async fn get_status(&self, job_id: &str) -> Result<Option<JobSnapshot>>;

    /// Full job record, or `None` for unknown ids.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Number of jobs in each ordering.
    async fn stats(&self) -> Result<QueueStats>;
}
