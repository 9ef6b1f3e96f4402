//! Job record, priority, status and the transition table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{HuginnError, Result};

/// Free-form JSON object used for parameters and metadata.
pub type Metadata = serde_json::Map<String, Value>;

/// Default per-attempt handler timeout.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default number of requeues after a failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Scheduling priority. Higher priorities are always claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The complete transition table. Anything not listed is rejected.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Retrying, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one execution attempt, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Handler wall-clock time in seconds.
    pub execution_time: f64,
}

impl JobResult {
    pub fn success(data: Value, execution_time: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Metadata::new(),
            execution_time,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: Metadata::new(),
            execution_time,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A unit of work.
///
/// Serializes to the persisted job record (`id`, `task_name`, `parameters`,
/// `priority`, `status`, timestamps, retry bookkeeping, `progress`,
/// `worker_id`, `metadata`, `result`). Timestamps are RFC 3339 or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_name: String,
    #[serde(default)]
    pub parameters: Metadata,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Percentage in `[0, 100]` for the current attempt.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub result: Option<JobResult>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Job {
    /// Create a pending job with a fresh id and default limits.
    pub fn new(task_name: impl Into<String>, parameters: Metadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            parameters,
            priority: JobPriority::default(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            progress: 0.0,
            worker_id: None,
            metadata: Metadata::new(),
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Move to `next`, rejecting anything outside the transition table.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(HuginnError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether another attempt is allowed after a failure.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Check the fields a submission must get right.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(HuginnError::Validation("job id must not be empty".into()));
        }
        if self.task_name.trim().is_empty() {
            return Err(HuginnError::Validation(
                "task name must not be empty".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(HuginnError::Validation(
                "timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.status != JobStatus::Pending {
            return Err(HuginnError::Validation(format!(
                "new jobs must be pending, got {}",
                self.status
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Read-only view of a job returned by status queries.
///
/// `error` is lifted out of the terminal result (or the last failed
/// attempt while the job is waiting to be retried) so callers don't have
/// to dig through metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub task_name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub progress: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub metadata: Metadata,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        let error = job
            .result
            .as_ref()
            .and_then(|r| r.error.clone())
            .or_else(|| {
                job.metadata
                    .get(LAST_ERROR_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            });
        Self {
            id: job.id.clone(),
            task_name: job.task_name.clone(),
            priority: job.priority,
            status: job.status,
            progress: job.progress,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            worker_id: job.worker_id.clone(),
            metadata: job.metadata.clone(),
            result: job.result.clone(),
            error,
        }
    }
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Metadata key holding the error of the most recent failed attempt.
pub const LAST_ERROR_KEY: &str = "last_error";

/// Counts per queue ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn transition_table_is_exhaustive() {
        use JobStatus::*;
        let all = [Pending, Running, Retrying, Completed, Failed, Cancelled];
        let allowed = [
            (Pending, Running),
            (Pending, Cancelled),
            (Running, Completed),
            (Running, Failed),
            (Running, Retrying),
            (Running, Cancelled),
            (Retrying, Pending),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut job = Job::new("t", Metadata::new());
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        let err = job.transition(JobStatus::Pending).unwrap_err();
        assert!(matches!(
            err,
            HuginnError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Pending
            }
        ));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn validate_rejects_empty_task_and_zero_timeout() {
        assert!(Job::new("", Metadata::new()).validate().is_err());
        assert!(
            Job::new("t", Metadata::new())
                .with_timeout_seconds(0)
                .validate()
                .is_err()
        );
        assert!(Job::new("t", Metadata::new()).validate().is_ok());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let p: JobPriority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(p, JobPriority::Urgent);
    }

    #[test]
    fn snapshot_prefers_terminal_error() {
        let mut job = Job::new("t", Metadata::new());
        job.metadata
            .insert(LAST_ERROR_KEY.into(), Value::from("first attempt"));
        assert_eq!(
            JobSnapshot::from(&job).error.as_deref(),
            Some("first attempt")
        );

        job.result = Some(JobResult::failure("final", 1.0));
        assert_eq!(JobSnapshot::from(&job).error.as_deref(), Some("final"));
    }
}
