//! Retry with exponential backoff for transient failures.
//!
//! Only errors classified [`ErrorKind::Transient`] are retried, up to the
//! declared `max_attempts` of the failing tool or operation. Backoff grows
//! exponentially with up to 25% random jitter.
//!
//! [`ErrorKind::Transient`]: crate::error::ErrorKind::Transient

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Backoff schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds
    pub initial_ms: u64,

    /// Delay ceiling in milliseconds
    pub max_ms: u64,

    /// Exponential multiplier
    pub multiplier: f64,

    /// Whether to add random jitter
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_ms);

        let delay_ms = if self.jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

/// Per-tool retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Backoff schedule between attempts
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }

    /// A policy with `max_attempts` and default backoff
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Execute `f`, retrying transient failures per `policy`
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.backoff.delay(attempt - 1);
            info!(
                operation,
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                warn!(operation, attempt, error = %err, "transient failure");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // attempts >= 1, so last_error is set if we fell through.
    Err(last_error.expect("retry loop exhausted without error"))
}
