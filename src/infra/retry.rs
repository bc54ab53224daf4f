//! Exponential backoff retry policies.
//!
//! The only two places the pipeline retries automatically: the entity-store
//! execution strategy (whole transaction) and the read-store adapter
//! (individual upsert/delete). Non-transient errors are never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::config::{
    DB_EXECUTION_BASE_DELAY_MS, DB_EXECUTION_JITTER_MS, DB_EXECUTION_RETRIES,
    READ_STORE_BACKOFF_BASE_MS, READ_STORE_RETRY_COUNT, RETRY_MAX_JITTER_MS,
};
use crate::errors::Transient;

/// Bounded retry with exponential backoff and random jitter.
///
/// Delay for attempt `n` (1-based) is `base_delay * 2^n` plus a random
/// jitter in `[0, max_jitter)`. Total attempts = `max_retries + 1`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Policy wrapping read-store upserts and deletes.
    pub fn read_store() -> Self {
        Self {
            max_retries: READ_STORE_RETRY_COUNT,
            base_delay: Duration::from_millis(READ_STORE_BACKOFF_BASE_MS),
            max_jitter: Duration::from_millis(RETRY_MAX_JITTER_MS),
        }
    }

    /// Execution strategy wrapping the whole write transaction.
    pub fn execution_strategy() -> Self {
        Self {
            max_retries: DB_EXECUTION_RETRIES,
            base_delay: Duration::from_millis(DB_EXECUTION_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DB_EXECUTION_JITTER_MS),
        }
    }

    /// Execute `operation`, retrying transient failures up to the bound.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + Transient,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(error) if !error.is_transient() => {
                    tracing::error!(
                        operation = operation_name,
                        error = %error,
                        "non-transient failure, not retrying"
                    );
                    return Err(error);
                }
                Err(error) if attempt > self.max_retries => {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "operation failed after all retries"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying after delay"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        backoff + jitter
    }
}
