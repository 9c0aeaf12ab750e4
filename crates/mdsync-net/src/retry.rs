//! Bounded exponential backoff for outbound calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::NetError;

/// Retry policy shared by every metadata-service and blob-store call.
///
/// The n-th retry waits `base_delay * 2^(n-1)`, capped at `max_delay`, so
/// the defaults ride out roughly three minutes of unavailability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy making a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a final error, or the attempt
    /// budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NetError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    if attempts == 1 {
                        return Err(e);
                    }
                    return Err(NetError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
