//! Bounded retry with exponential backoff and jitter.
//!
//! Callers classify their errors through [`Retryable`]; permanent errors abort
//! immediately, transient errors retry until the attempt budget is spent.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Classifies an error as worth retrying or not.
pub trait Retryable {
    /// Transient errors (timeouts, 5xx, rate limits) may succeed on retry;
    /// everything else is permanent.
    fn is_transient(&self) -> bool;
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The first permanent error encountered; no further attempts were made.
    #[error("{operation} failed permanently: {source}")]
    Permanent {
        operation: String,
        #[source]
        source: E,
    },
    /// All attempts were transient failures.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn into_source(self) -> E {
        match self {
            RetryError::Permanent { source, .. } => source,
            RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay, 0.0..=1.0.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Policy with no delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has no
    /// preceding delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exp = (attempt - 2).min(16);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);

        if self.jitter <= 0.0 {
            return Duration::from_millis(base);
        }

        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((base as f64 * factor) as u64)
    }

    /// Run `operation`, retrying transient failures with backoff.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > 1 {
                crate::metrics::RETRY_ATTEMPTS
                    .with_label_values(&[operation])
                    .inc();
            }

            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    tracing::warn!(operation, attempt, error = %e, "permanent error, not retrying");
                    return Err(RetryError::Permanent {
                        operation: operation.to_string(),
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(operation, attempt, error = %e, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::debug!(operation, attempt, error = %e, "transient error, will retry");
                }
            }
        }
    }
}
