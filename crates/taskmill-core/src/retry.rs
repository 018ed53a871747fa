//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;

/// Exponential backoff retry policy
///
/// `max_retries` counts retries after the first attempt, so a policy with
/// `max_retries = N` allows `N + 1` attempts in total. Delays are
/// deterministic: `initial_delay * base^(attempt - 1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Base of the exponential (> 1.0)
    pub backoff_base: f64,

    /// Delay before the second attempt, in seconds
    pub initial_delay: f64,

    /// Upper bound for any delay, in seconds
    pub max_delay: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            initial_delay: 1.0,
            max_delay: 60.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, backoff_base: f64, initial_delay: f64, max_delay: f64) -> Self {
        Self {
            max_retries,
            backoff_base,
            initial_delay,
            max_delay,
        }
    }

    /// Policy with a caller-supplied retry budget, keeping the other knobs
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Backoff delay before the attempt following `attempt`
    ///
    /// Returns zero for `attempt <= 0`; otherwise
    /// `min(initial_delay * base^(attempt - 1), max_delay)`.
    pub fn delay(&self, attempt: i64) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1) as f64;
        let seconds = self.initial_delay * self.backoff_base.powf(exponent);
        Duration::from_secs_f64(seconds.min(self.max_delay))
    }

    /// Decide whether another attempt should run after `attempt` produced
    /// `result`
    pub fn should_retry(&self, attempt: u32, result: &ExecutionResult) -> bool {
        if result.is_success() {
            return false;
        }
        attempt <= self.max_retries
    }

    /// Run `attempt_fn` until it succeeds or the retry budget is spent
    ///
    /// The callback receives the 1-based attempt number and returns the
    /// attempt's [`ExecutionResult`]; infrastructure errors abort the loop
    /// immediately. The inter-attempt sleep races against `cancel` and
    /// surfaces [`Error::Cancelled`] when the flag flips to `true`.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        mut attempt_fn: F,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<ExecutionResult>>,
    {
        let mut attempt: u32 = 1;

        loop {
            let result = attempt_fn(attempt).await?;

            if !self.should_retry(attempt, &result) {
                return Ok(result);
            }

            let sleep = tokio::time::sleep(self.delay(attempt as i64));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = cancel.changed() => match changed {
                        Ok(()) if *cancel.borrow() => return Err(Error::Cancelled),
                        Ok(()) => continue,
                        // Sender gone without cancelling: finish the sleep
                        Err(_) => {
                            sleep.as_mut().await;
                            break;
                        }
                    }
                }
            }

            attempt += 1;
        }
    }
}
