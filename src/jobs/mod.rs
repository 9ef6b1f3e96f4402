//! Job queue, workers and lifecycle.
//!
//! A producer submits a [`Job`] through the [`JobManager`]; one of the
//! manager's [`JobWorker`]s claims it from the [`JobQueue`], looks up its
//! [`TaskHandler`] in the [`TaskRegistry`] and runs it under the job's
//! timeout. The shared [`RetryPolicy`] then completes, requeues or fails
//! the job.
//!
//! Status transitions are checked against a fixed table
//! ([`JobStatus::can_transition_to`]):
//!
//! ```text
//! Pending -> Running -> Completed
//!    |         |   \-> Failed
//!    |         |   \-> Retrying -> Pending
//!    \---------+-----> Cancelled
//! ```

mod context;
mod manager;
mod memory;
mod policy;
mod queue;
mod registry;
mod types;
mod worker;

pub use context::TaskContext;
pub use manager::{GenerationTicket, JobManager, JobManagerBuilder, JobManagerConfig, SubmitOptions};
pub use memory::MemoryJobQueue;
pub use policy::{AttemptOutcome, RetryPolicy, Settlement};
pub use queue::{ClaimedJob, JobQueue};
pub use registry::{FnHandler, HandlerError, HandlerResult, TaskHandler, TaskRegistry, handler_fn};
pub use types::{
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS, Job, JobPriority, JobResult, JobSnapshot,
    JobStatus, LAST_ERROR_KEY, Metadata, QueueStats,
};
pub use worker::JobWorker;
