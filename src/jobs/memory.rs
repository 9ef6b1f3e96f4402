//! In-process job queue.
//!
//! All bookkeeping lives behind one mutex that is only ever held for a
//! single synchronous mutation. The pending ordering is a `BTreeMap`
//! keyed on `(Reverse(priority), sequence)`, so `pop_first` under the lock
//! is the atomic claim: the first key is always the highest priority,
//! earliest enqueued job.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::queue::{ClaimedJob, JobQueue};
use super::types::{
    Job, JobPriority, JobResult, JobSnapshot, JobStatus, LAST_ERROR_KEY, Metadata, QueueStats,
};
use crate::telemetry;
use crate::{HuginnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    rank: Reverse<JobPriority>,
    sequence: u64,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    pending: BTreeMap<PendingKey, String>,
    pending_keys: HashMap<String, PendingKey>,
    running: HashMap<String, CancellationToken>,
    completed: Vec<String>,
    failed: Vec<String>,
    cancelled: Vec<String>,
    next_sequence: u64,
}

impl QueueState {
    fn push_pending(&mut self, job_id: &str, priority: JobPriority) {
        let key = PendingKey {
            rank: Reverse(priority),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.pending.insert(key, job_id.to_owned());
        self.pending_keys.insert(job_id.to_owned(), key);
        self.record_depth();
    }

    fn remove_pending(&mut self, job_id: &str) {
        if let Some(key) = self.pending_keys.remove(job_id) {
            self.pending.remove(&key);
        }
        self.record_depth();
    }

    fn job_mut(&mut self, job_id: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| HuginnError::JobNotFound(job_id.to_owned()))
    }

    fn record_depth(&self) {
        metrics::gauge!(telemetry::QUEUE_DEPTH).set(self.pending.len() as f64);
    }
}

/// Mutex-guarded in-memory [`JobQueue`].
///
/// Suitable for a single process. Records are kept until the process
/// exits; retention is up to the embedding application.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| HuginnError::lock_poisoned("job queue"))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<String> {
        job.validate()?;
        let mut state = self.lock()?;
        if state.jobs.contains_key(&job.id) {
            return Err(HuginnError::Validation(format!(
                "duplicate job id: {}",
                job.id
            )));
        }

        let id = job.id.clone();
        metrics::counter!(telemetry::JOBS_SUBMITTED_TOTAL,
            "task" => job.task_name.clone(),
            "priority" => job.priority.as_str(),
        )
        .increment(1);
        debug!(job_id = %id, task = %job.task_name, priority = %job.priority, "job enqueued");

        state.push_pending(&id, job.priority);
        state.jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let mut state = self.lock()?;
        while let Some((_, job_id)) = state.pending.pop_first() {
            state.pending_keys.remove(&job_id);
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            job.transition(JobStatus::Running)?;
            job.started_at = Some(Utc::now());
            job.worker_id = Some(worker_id.to_owned());
            job.progress = 0.0;
            let claimed = job.clone();

            let cancellation = CancellationToken::new();
            state.running.insert(job_id, cancellation.clone());
            state.record_depth();
            return Ok(Some(ClaimedJob {
                job: claimed,
                cancellation,
            }));
        }
        Ok(None)
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: f64,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let job = state.job_mut(job_id)?;
        if job.status != JobStatus::Running {
            debug!(job_id, status = %job.status, "ignoring progress for job that is not running");
            return Ok(());
        }
        if progress.is_finite() {
            job.progress = job.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some(metadata) = metadata {
            job.metadata.extend(metadata);
        }
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: JobResult) -> Result<Job> {
        let mut state = self.lock()?;
        let job = state.job_mut(job_id)?;
        let target = if result.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.transition(target)?;
        job.completed_at = Some(Utc::now());
        if result.success {
            job.progress = 100.0;
        }
        job.result = Some(result);
        let finished = job.clone();

        state.running.remove(job_id);
        let set = if target == JobStatus::Completed {
            &mut state.completed
        } else {
            &mut state.failed
        };
        set.push(job_id.to_owned());

        metrics::counter!(telemetry::JOBS_FINISHED_TOTAL,
            "task" => finished.task_name.clone(),
            "status" => target.as_str(),
        )
        .increment(1);
        Ok(finished)
    }

    async fn requeue(&self, job_id: &str, error: &str) -> Result<Job> {
        let mut state = self.lock()?;
        let job = state.job_mut(job_id)?;
        job.transition(JobStatus::Retrying)?;
        job.retry_count += 1;
        job.progress = 0.0;
        job.started_at = None;
        job.worker_id = None;
        job.metadata
            .insert(LAST_ERROR_KEY.to_owned(), Value::from(error));
        job.transition(JobStatus::Pending)?;
        let requeued = job.clone();

        state.running.remove(job_id);
        state.push_pending(job_id, requeued.priority);

        metrics::counter!(telemetry::JOB_RETRIES_TOTAL, "task" => requeued.task_name.clone())
            .increment(1);
        Ok(requeued)
    }

    async fn cancel(&self, job_id: &str) -> Result<Job> {
        let mut state = self.lock()?;
        let job = state.job_mut(job_id)?;
        let previous = job.status;
        job.transition(JobStatus::Cancelled)?;
        job.completed_at = Some(Utc::now());
        let cancelled = job.clone();

        match previous {
            JobStatus::Pending => state.remove_pending(job_id),
            _ => {
                if let Some(token) = state.running.remove(job_id) {
                    token.cancel();
                }
            }
        }
        state.cancelled.push(job_id.to_owned());

        metrics::counter!(telemetry::JOBS_FINISHED_TOTAL,
            "task" => cancelled.task_name.clone(),
            "status" => JobStatus::Cancelled.as_str(),
        )
        .increment(1);
        debug!(job_id, from = %previous, "job cancelled");
        Ok(cancelled)
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let state = self.lock()?;
        Ok(state.jobs.get(job_id).map(JobSnapshot::from))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let state = self.lock()?;
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.lock()?;
        Ok(QueueStats {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            cancelled: state.cancelled.len(),
        })
    }
}
