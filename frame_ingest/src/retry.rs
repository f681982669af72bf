use crate::config::RetryConfig;
use crate::inference_client::InferenceError;
use detection_store::StorageError;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};

/// Errors that may go away when the operation is attempted again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }
}

impl Transient for InferenceError {
    fn is_transient(&self) -> bool {
        InferenceError::is_transient(self)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Permanent error, or the policy allows a single attempt.
    Failed(E),
    /// Every allowed attempt failed with a transient error.
    Exhausted {
        step: &'static str,
        attempts: u32,
        last: E,
    },
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor.max(1),
        }
    }

    /// A single attempt per step.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_before(&self, retry: u32) -> Duration {
        let base = self
            .backoff_factor
            .checked_pow(retry.saturating_sub(1))
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        let jitter = rand::random::<f32>() * 0.2 + 0.9;
        base.mul_f32(jitter)
    }

    pub async fn run<T, E, F, Fut>(&self, step: &'static str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(step, attempt, "retry successful");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() || self.max_attempts == 1 => {
                    return Err(RetryError::Failed(e));
                }
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        step,
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_before(attempt);
                    tracing::warn!(
                        step,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
