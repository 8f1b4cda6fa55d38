//! Timeout and bounded exponential backoff around shard calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::RouterError;
use crate::config::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS, DEFAULT_SHARD_TIMEOUT};
use crate::shard::{ShardError, ShardId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to each attempt separately.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
            timeout: DEFAULT_SHARD_TIMEOUT,
        }
    }
}

/// What a retried call cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempts {
    pub made: u32,
}

impl Attempts {
    pub fn retries(&self) -> u32 {
        self.made.saturating_sub(1)
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts. Transient failures (see [`ShardError::is_transient`]) and
    /// timeouts are retried; anything else is returned at once.
    pub async fn run<T, F, Fut>(
        &self,
        shard: ShardId,
        attempts: &mut Attempts,
        mut op: F,
    ) -> Result<T, RouterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ShardError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        loop {
            attempts.made += 1;
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ShardError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    return Err(RouterError::Shard { shard, source: e })
                }
                Err(e) => e,
            };

            if attempts.made >= max_attempts {
                return Err(RouterError::ShardUnavailable {
                    shard,
                    attempts: attempts.made,
                    reason: error.to_string(),
                });
            }

            let delay = self.backoff(attempts.made);
            warn!(
                %shard,
                attempt = attempts.made,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "shard call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
