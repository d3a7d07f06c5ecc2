//! Typed retry for rate-limited provider calls.
//!
//! Only [`AiError::RateLimited`] is retried, on the same provider, with
//! doubling backoff clamped to a window. Any other error falls through to
//! the caller immediately so the next provider gets its turn.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::AiError;

/// Retry policy: total attempts and the backoff window.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Backoff before retry number `attempt` (0-indexed): doubles each time,
    /// clamped to `max_backoff`.
    fn backoff(&self, attempt: u32) -> Duration {
        let millis = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Run `op`, retrying rate-limit errors up to `max_attempts` total calls.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, AiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ AiError::RateLimited { .. }) if attempt + 1 < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(error = %e, wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
