//! Per-attempt context handed to task handlers.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::queue::JobQueue;
use super::types::Metadata;

/// What a handler gets besides the job itself: a progress callback and a
/// cancellation signal.
///
/// Cloning is cheap; clones report into the same attempt.
#[derive(Clone)]
pub struct TaskContext {
    job_id: String,
    queue: Arc<dyn JobQueue>,
    cancellation: CancellationToken,
    last_progress: Arc<Mutex<f64>>,
}

impl TaskContext {
    pub(crate) fn new(
        job_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            queue,
            cancellation,
            last_progress: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report progress as a percentage, optionally with metadata.
    ///
    /// Values are clamped to `[0, 100]`; a value lower than one already
    /// reported in this attempt is raised to the previous value, so the
    /// stored progress never goes backwards. Storage failures are logged
    /// and swallowed: progress is advisory and must not fail the job.
    pub async fn report_progress(&self, percent: f64, metadata: Option<Metadata>) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let percent = match self.last_progress.lock() {
            Ok(mut last) => {
                *last = last.max(percent);
                *last
            }
            Err(_) => percent,
        };

        if let Err(e) = self
            .queue
            .update_progress(&self.job_id, percent, metadata)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to record progress");
        }
    }

    /// Token that fires when the job is cancelled or its attempt times out.
    ///
    /// Long-running handlers should check it between steps, or `select!`
    /// on [`CancellationToken::cancelled`].
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, MemoryJobQueue};

    #[tokio::test]
    async fn report_forwards_clamped_monotonic_progress() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        let id = queue
            .enqueue(Job::new("t", Metadata::new()))
            .await
            .unwrap();
        let claimed = queue.dequeue("w").await.unwrap().unwrap();
        let ctx = TaskContext::new(&id, queue.clone(), claimed.cancellation);

        ctx.report_progress(30.0, None).await;
        ctx.report_progress(10.0, None).await;
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().progress,
            30.0
        );

        ctx.report_progress(140.0, None).await;
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().progress,
            100.0
        );
    }

    #[tokio::test]
    async fn cancellation_is_visible_to_handler() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        let id = queue
            .enqueue(Job::new("t", Metadata::new()))
            .await
            .unwrap();
        let claimed = queue.dequeue("w").await.unwrap().unwrap();
        let ctx = TaskContext::new(&id, queue.clone(), claimed.cancellation);

        assert!(!ctx.is_cancelled());
        queue.cancel(&id).await.unwrap();
        assert!(ctx.is_cancelled());
    }
}
