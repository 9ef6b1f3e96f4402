//! Huginn error types

use crate::jobs::JobStatus;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Submission errors
    #[error("validation failed: {0}")]
    Validation(String),

    // Handler failures (subject to the job retry policy)
    #[error("handler failed: {0}")]
    Execution(String),

    #[error("handler timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The worker pool was stopped and the grace period ran out before the
    /// handler finished. Never retried.
    #[error("worker shut down before the job finished")]
    WorkerShutdown,

    // Storage errors
    /// Queue or cache storage could not be reached (or its state is
    /// unusable). Workers back off and retry the storage operation.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    // Lookup errors
    #[error("no handler registered for task '{0}'")]
    HandlerNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("gave up waiting for job {0}")]
    WaitTimedOut(String),

    /// The requested status change is not in the job transition table.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration / lifecycle errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("worker pool is already running")]
    AlreadyRunning,
}

impl HuginnError {
    /// Whether a storage operation that produced this error is worth retrying.
    ///
    /// Only backend outages qualify; everything else is a permanent answer
    /// from the queue or cache.
    pub fn is_transient(&self) -> bool {
        matches!(self, HuginnError::BackendUnavailable(_))
    }

    /// Whether a job that failed with this error may be requeued.
    ///
    /// Handler errors and timeouts follow the retry policy. A missing handler
    /// is a configuration problem and is never retried.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            HuginnError::Execution(_) | HuginnError::Timeout { .. }
        )
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        HuginnError::BackendUnavailable(format!("{what} lock poisoned"))
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
