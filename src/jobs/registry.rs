//! Task handlers and the name → handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::context::TaskContext;
use super::types::Job;
use crate::{HuginnError, Result};

/// Error type handlers may return. Any error converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler produces: a JSON payload or an error.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Executes jobs for one task name.
///
/// Handlers run on a spawned task under the job's timeout. They should
/// report progress through [`TaskContext::report_progress`] and stop early
/// when [`TaskContext::is_cancelled`] turns true. Returning `Err` (or
/// panicking) fails the attempt; the retry policy decides what happens next.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: TaskContext) -> HandlerResult;
}

#[async_trait]
impl<H: TaskHandler + ?Sized> TaskHandler for Arc<H> {
    async fn run(&self, job: &Job, ctx: TaskContext) -> HandlerResult {
        (**self).run(job, ctx).await
    }
}

/// Adapter turning an async closure into a [`TaskHandler`].
///
/// ```rust
/// use huginn::jobs::{handler_fn, TaskRegistry};
///
/// let registry = TaskRegistry::new();
/// registry
///     .register(
///         "echo",
///         handler_fn(|job, _ctx| async move { Ok(serde_json::Value::Object(job.parameters)) }),
///     )
///     .unwrap();
/// assert!(registry.contains("echo").unwrap());
/// ```
pub struct FnHandler<F>(F);

/// Wrap an async closure `(Job, TaskContext) -> HandlerResult` as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Job, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, job: &Job, ctx: TaskContext) -> HandlerResult {
        (self.0)(job.clone(), ctx).await
    }
}

/// Thread-safe map from task name to handler.
///
/// Handlers can be registered before or after workers start; workers look
/// handlers up at claim time.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `task_name`, replacing any previous one.
    pub fn register(
        &self,
        task_name: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<()> {
        let task_name = task_name.into();
        if task_name.trim().is_empty() {
            return Err(HuginnError::Validation(
                "task name must not be empty".into(),
            ));
        }
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| HuginnError::lock_poisoned("task registry"))?;
        if handlers
            .insert(task_name.clone(), Arc::new(handler))
            .is_some()
        {
            warn!(task = %task_name, "replaced existing task handler");
        }
        Ok(())
    }

    /// Remove a handler. Returns true if one was registered.
    pub fn unregister(&self, task_name: &str) -> Result<bool> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| HuginnError::lock_poisoned("task registry"))?;
        Ok(handlers.remove(task_name).is_some())
    }

    pub fn get(&self, task_name: &str) -> Result<Option<Arc<dyn TaskHandler>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| HuginnError::lock_poisoned("task registry"))?;
        Ok(handlers.get(task_name).cloned())
    }

    pub fn contains(&self, task_name: &str) -> Result<bool> {
        Ok(self.get(task_name)?.is_some())
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .map_err(|_| HuginnError::lock_poisoned("task registry"))?
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = self.handlers.write();
                    panic!("poisoning task registry");
                })
                .join()
        });
    }
}
