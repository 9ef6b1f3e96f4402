//! The worker loop: claim, dispatch, time out, settle.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::TaskContext;
use super::policy::{AttemptOutcome, RetryPolicy, Settlement};
use super::queue::{ClaimedJob, JobQueue};
use super::registry::TaskRegistry;
use super::types::JobStatus;
use crate::HuginnError;
use crate::telemetry;

/// One independent consumer of the job queue.
///
/// Workers share nothing but the queue, the registry and the retry policy.
/// Any number of them can run concurrently; the queue's atomic claim keeps
/// them from ever running the same attempt twice.
pub struct JobWorker {
    id: String,
    queue: Arc<dyn JobQueue>,
    registry: Arc<TaskRegistry>,
    policy: Arc<RetryPolicy>,
    poll_interval: Duration,
    halt: CancellationToken,
}

impl JobWorker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<TaskRegistry>,
        policy: Arc<RetryPolicy>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            registry,
            policy,
            poll_interval,
            halt: CancellationToken::new(),
        }
    }

    /// Interrupt the in-flight job when `halt` fires.
    ///
    /// The handler's cancellation token is triggered, its task is aborted
    /// and the job fails with [`HuginnError::WorkerShutdown`].
    pub fn halt_on(mut self, halt: CancellationToken) -> Self {
        self.halt = halt;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Poll the queue until `shutdown` fires.
    ///
    /// Shutdown is checked between jobs only: an in-flight job runs to
    /// settlement (bounded by its own timeout) before the loop exits, unless
    /// the halt token fires first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "worker started");
        let mut storage_failures: u32 = 0;

        while !shutdown.is_cancelled() {
            match self.queue.dequeue(&self.id).await {
                Ok(Some(claim)) => {
                    storage_failures = 0;
                    self.execute(claim).await;
                }
                Ok(None) => {
                    storage_failures = 0;
                    if idle(&shutdown, self.poll_interval).await {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    let delay = self.policy.storage().delay_for_attempt(storage_failures);
                    storage_failures = storage_failures.saturating_add(1);
                    metrics::counter!(telemetry::STORAGE_RETRIES_TOTAL, "operation" => "dequeue")
                        .increment(1);
                    warn!(
                        worker_id = %self.id,
                        consecutive_failures = storage_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "queue unavailable, backing off"
                    );
                    if idle(&shutdown, delay).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "dequeue failed");
                    if idle(&shutdown, self.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
    }

    /// Run one claimed job and settle it through the retry policy.
    ///
    /// Never fails: handler errors, panics and timeouts become attempt
    /// outcomes, and settlement errors are logged. Returns `None` when the
    /// outcome could not be recorded (e.g. the job was cancelled meanwhile).
    pub async fn execute(&self, claim: ClaimedJob) -> Option<Settlement> {
        let ClaimedJob { job, cancellation } = claim;
        debug!(
            worker_id = %self.id,
            job_id = %job.id,
            task = %job.task_name,
            attempt = job.retry_count + 1,
            "job claimed"
        );

        let outcome = match self.registry.get(&job.task_name) {
            Err(e) => AttemptOutcome::Failed {
                error: e,
                elapsed: Duration::ZERO,
            },
            Ok(None) => AttemptOutcome::Failed {
                error: HuginnError::HandlerNotFound(job.task_name.clone()),
                elapsed: Duration::ZERO,
            },
            Ok(Some(handler)) => {
                let ctx = TaskContext::new(job.id.clone(), self.queue.clone(), cancellation.clone());
                let timeout = Duration::from_secs(job.timeout_seconds);
                let started = Instant::now();

                let task_job = job.clone();
                let mut handle = tokio::spawn(async move { handler.run(&task_job, ctx).await });

                let joined = tokio::select! {
                    biased;
                    joined = tokio::time::timeout(timeout, &mut handle) => Some(joined),
                    _ = self.halt.cancelled() => None,
                };

                let outcome = match joined {
                    Some(Ok(Ok(Ok(data)))) => AttemptOutcome::Succeeded {
                        data,
                        elapsed: started.elapsed(),
                    },
                    Some(Ok(Ok(Err(e)))) => AttemptOutcome::Failed {
                        error: HuginnError::Execution(e.to_string()),
                        elapsed: started.elapsed(),
                    },
                    Some(Ok(Err(join_err))) => {
                        let message = if join_err.is_panic() {
                            format!("handler panicked: {}", panic_message(join_err.into_panic()))
                        } else {
                            "handler task was aborted".to_string()
                        };
                        AttemptOutcome::Failed {
                            error: HuginnError::Execution(message),
                            elapsed: started.elapsed(),
                        }
                    }
                    Some(Err(_)) => {
                        cancellation.cancel();
                        handle.abort();
                        metrics::counter!(telemetry::JOB_TIMEOUTS_TOTAL, "task" => job.task_name.clone())
                            .increment(1);
                        AttemptOutcome::Failed {
                            error: HuginnError::Timeout {
                                seconds: job.timeout_seconds,
                            },
                            elapsed: started.elapsed(),
                        }
                    }
                    None => {
                        cancellation.cancel();
                        handle.abort();
                        // Wait for the abort to land so the handler cannot
                        // outlive the pool.
                        let _ = handle.await;
                        warn!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            task = %job.task_name,
                            "worker halted, interrupting job"
                        );
                        AttemptOutcome::Failed {
                            error: HuginnError::WorkerShutdown,
                            elapsed: started.elapsed(),
                        }
                    }
                };
                metrics::histogram!(telemetry::JOB_DURATION_SECONDS, "task" => job.task_name.clone())
                    .record(outcome.elapsed().as_secs_f64());
                outcome
            }
        };

        match self.policy.settle(self.queue.as_ref(), &job, outcome).await {
            Ok(settlement) => Some(settlement),
            Err(HuginnError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => {
                info!(job_id = %job.id, "job was cancelled while running, discarding result");
                None
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job.id, error = %e, "failed to settle job");
                None
            }
        }
    }
}

/// Sleep for `delay` unless shutdown fires first. Returns true on shutdown.
async fn idle(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
