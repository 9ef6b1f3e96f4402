//! Job retry policy.
//!
//! Workers never decide on their own whether a failed job runs again. They
//! hand every attempt outcome to the [`RetryPolicy`] owned by the
//! [`JobManager`](super::JobManager), which completes, requeues or fails
//! the job. Storage calls made while settling go through the storage
//! [`RetryConfig`] backoff.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::queue::JobQueue;
use super::types::{Job, JobResult};
use crate::retry::{RetryConfig, with_retry};
use crate::{HuginnError, Result};

/// Outcome of running a handler once.
#[derive(Debug)]
pub enum AttemptOutcome {
    Succeeded { data: Value, elapsed: Duration },
    Failed { error: HuginnError, elapsed: Duration },
}

impl AttemptOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            AttemptOutcome::Succeeded { elapsed, .. } | AttemptOutcome::Failed { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// Where a job ended up after an attempt was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed(Job),
    Requeued(Job),
    Failed(Job),
}

impl Settlement {
    pub fn job(&self) -> &Job {
        match self {
            Settlement::Completed(job) | Settlement::Requeued(job) | Settlement::Failed(job) => job,
        }
    }
}

/// Decides between completion, requeue and terminal failure.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    storage: RetryConfig,
}

impl RetryPolicy {
    pub fn new(storage: RetryConfig) -> Self {
        Self { storage }
    }

    /// Backoff used for queue calls made while settling (and by workers
    /// when claiming).
    pub fn storage(&self) -> &RetryConfig {
        &self.storage
    }

    /// A failed attempt is retried when the failure kind allows it and the
    /// job still has retries left.
    pub fn should_retry(&self, job: &Job, error: &HuginnError) -> bool {
        error.is_retryable_failure() && job.has_retries_left()
    }

    /// Report an attempt outcome for `job` (as claimed) to the queue.
    pub async fn settle(
        &self,
        queue: &dyn JobQueue,
        job: &Job,
        outcome: AttemptOutcome,
    ) -> Result<Settlement> {
        match outcome {
            AttemptOutcome::Succeeded { data, elapsed } => {
                let result = JobResult::success(data, elapsed.as_secs_f64())
                    .with_metadata("attempts", job.retry_count + 1);
                let done = with_retry(&self.storage, "complete", || {
                    queue.complete(&job.id, result.clone())
                })
                .await?;
                debug!(job_id = %job.id, task = %job.task_name, "job completed");
                Ok(Settlement::Completed(done))
            }
            AttemptOutcome::Failed { error, elapsed } if self.should_retry(job, &error) => {
                let message = error.to_string();
                let requeued = with_retry(&self.storage, "requeue", || {
                    queue.requeue(&job.id, &message)
                })
                .await?;
                warn!(
                    job_id = %job.id,
                    task = %job.task_name,
                    attempt = job.retry_count + 1,
                    max_retries = job.max_retries,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %message,
                    "job attempt failed, requeued"
                );
                Ok(Settlement::Requeued(requeued))
            }
            AttemptOutcome::Failed { error, elapsed } => {
                let result = JobResult::failure(error.to_string(), elapsed.as_secs_f64())
                    .with_metadata("error_kind", error_kind(&error))
                    .with_metadata("attempts", job.retry_count + 1);
                let failed = with_retry(&self.storage, "complete", || {
                    queue.complete(&job.id, result.clone())
                })
                .await?;
                error!(
                    job_id = %job.id,
                    task = %job.task_name,
                    retry_count = failed.retry_count,
                    error = %error,
                    "job failed"
                );
                Ok(Settlement::Failed(failed))
            }
        }
    }
}

fn error_kind(error: &HuginnError) -> &'static str {
    match error {
        HuginnError::Timeout { .. } => "timeout",
        HuginnError::Execution(_) => "execution",
        HuginnError::HandlerNotFound(_) => "configuration",
        HuginnError::WorkerShutdown => "shutdown",
        _ => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, Metadata, MemoryJobQueue};

    async fn claimed(queue: &MemoryJobQueue, max_retries: u32) -> Job {
        queue
            .enqueue(Job::new("t", Metadata::new()).with_max_retries(max_retries))
            .await
            .unwrap();
        queue.dequeue("w").await.unwrap().unwrap().job
    }

    #[tokio::test]
    async fn success_completes() {
        let queue = MemoryJobQueue::new();
        let job = claimed(&queue, 1).await;
        let settled = RetryPolicy::default()
            .settle(
                &queue,
                &job,
                AttemptOutcome::Succeeded {
                    data: Value::from("ok"),
                    elapsed: Duration::from_millis(1500),
                },
            )
            .await
            .unwrap();
        let Settlement::Completed(done) = settled else {
            panic!("expected completion, got {settled:?}");
        };
        let result = done.result.unwrap();
        assert!(result.success);
        assert_eq!(result.execution_time, 1.5);
        assert_eq!(result.metadata["attempts"], 1);
    }

    #[tokio::test]
    async fn execution_failure_requeues_while_retries_remain() {
        let queue = MemoryJobQueue::new();
        let job = claimed(&queue, 1).await;
        let settled = RetryPolicy::default()
            .settle(
                &queue,
                &job,
                AttemptOutcome::Failed {
                    error: HuginnError::Execution("boom".into()),
                    elapsed: Duration::ZERO,
                },
            )
            .await
            .unwrap();
        assert!(matches!(settled, Settlement::Requeued(ref j) if j.status == JobStatus::Pending));
        assert_eq!(settled.job().retry_count, 1);
    }

    #[tokio::test]
    async fn missing_handler_is_never_retried() {
        let queue = MemoryJobQueue::new();
        let job = claimed(&queue, 5).await;
        let settled = RetryPolicy::default()
            .settle(
                &queue,
                &job,
                AttemptOutcome::Failed {
                    error: HuginnError::HandlerNotFound("t".into()),
                    elapsed: Duration::ZERO,
                },
            )
            .await
            .unwrap();
        let Settlement::Failed(failed) = settled else {
            panic!("expected failure, got {settled:?}");
        };
        assert_eq!(failed.retry_count, 0);
        let result = failed.result.unwrap();
        assert_eq!(result.metadata["error_kind"], "configuration");
        assert!(result.error.unwrap().contains("no handler registered"));
    }

    #[tokio::test]
    async fn exhausted_timeout_fails_with_timeout_kind() {
        let queue = MemoryJobQueue::new();
        let job = claimed(&queue, 0).await;
        let settled = RetryPolicy::default()
            .settle(
                &queue,
                &job,
                AttemptOutcome::Failed {
                    error: HuginnError::Timeout { seconds: 3 },
                    elapsed: Duration::from_secs(3),
                },
            )
            .await
            .unwrap();
        let Settlement::Failed(failed) = settled else {
            panic!("expected failure, got {settled:?}");
        };
        assert_eq!(failed.status, JobStatus::Failed);
        let result = failed.result.unwrap();
        assert_eq!(result.metadata["error_kind"], "timeout");
        assert!(result.error.unwrap().contains("timed out"));
    }
}
