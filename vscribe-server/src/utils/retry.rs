//! Bounded-backoff retry combinator
//!
//! Vendor calls absorb transient failures here instead of sprinkling sleeps
//! through business logic. Only errors classified retryable are absorbed;
//! everything else (cancellation, policy rejections, tool problems)
//! propagates immediately.

use std::time::Duration;
use tracing::{debug, warn};
#[cfg(test)]
use vscribe_common::Error;
use vscribe_common::Result;

/// Retry policy: attempt bound plus a bounded multiplicative backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep after a failed attempt
    pub base_delay: Duration,
    /// Backoff multiplier applied per failure
    pub multiplier: f64,
    /// Ceiling on any single sleep
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` attempts and a fixed failure sleep.
    pub fn attempts(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    fn delay_for(&self, failure_count: u32) -> Duration {
        let factor = self.multiplier.powi(failure_count.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or attempts are
/// exhausted. The final error is returned unwrapped.
pub async fn retry<F, Fut, T>(name: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if attempt > 1 {
                    warn!(operation = name, attempt, error = %err, "Giving up after retries");
                }
                return Err(err);
            }
        }
    }
}
