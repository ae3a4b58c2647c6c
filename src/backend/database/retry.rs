use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Bounded exponential backoff for transient database failures
///
/// The first retry waits `base_delay`, every following retry doubles the wait,
/// and no wait exceeds `max_delay`. Up to a quarter of the computed delay is
/// added as random jitter so parallel sessions do not retry in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the given retry (1-based), before jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let shift = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    /// Delay before the given retry (1-based), including jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_millis() as u64 / 4;
        if spread == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max_delay.max(delay))
    }

    /// Whether a failure seen after `retries_done` retries should be retried
    pub fn should_retry(&self, error: &AppError, retries_done: u32) -> bool {
        error.is_transient() && retries_done < self.max_retries
    }

    /// Convert the final failure of a retried operation into its terminal form
    pub fn exhausted(&self, operation: &str, error: AppError, retries_done: u32) -> AppError {
        match error {
            AppError::Transient(message) => AppError::Connectivity(format!(
                "{} failed after {} attempt(s): {}",
                operation,
                retries_done + 1,
                message
            )),
            other => other,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error, retries) => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(
                        "{} hit a transient failure ({}); retry {}/{} in {}ms",
                        operation,
                        error,
                        retries,
                        self.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(self.exhausted(operation, error, retries)),
            }
        }
    }
}
