//! Backoff for storage operations.
//!
//! [`RetryConfig`] controls how workers retry queue operations that fail
//! with a transient backend error. This is separate from the *job* retry
//! policy ([`RetryPolicy`](crate::jobs::RetryPolicy)): a storage retry
//! repeats the bookkeeping call, never the handler.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::telemetry;
use crate::{HuginnError, Result};

/// Configuration for retrying transient storage errors.
///
/// Uses exponential backoff capped at `max_delay`:
///
/// ```rust
/// # use huginn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(50));
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first call).
    /// 1 = no retry. Default: 5.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 100ms.
    #[serde(rename = "initial_delay_ms", deserialize_with = "millis::deserialize")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay. Default: 5s.
    #[serde(rename = "max_delay_ms", deserialize_with = "millis::deserialize")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the first call).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Run a storage operation, retrying transient errors with backoff.
///
/// Permanent errors (anything not [`HuginnError::is_transient`]) are
/// returned immediately.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts.max(1) {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                metrics::counter!(telemetry::STORAGE_RETRIES_TOTAL, "operation" => operation.to_owned())
                    .increment(1);
                if attempt + 1 < config.max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying storage operation after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        HuginnError::BackendUnavailable(format!("{operation}: no attempts made"))
    }))
}

/// Serde adapter for durations written as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().max_attempts(4);
        let result = with_retry(&config, "dequeue", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HuginnError::BackendUnavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().max_attempts(3);
        let result: Result<()> = with_retry(&config, "complete", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HuginnError::BackendUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(HuginnError::BackendUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryConfig::new(), "complete", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HuginnError::JobNotFound("j".into()))
        })
        .await;
        assert!(matches!(result, Err(HuginnError::JobNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
