//! Concurrency limiter for expensive external calls.
//!
//! Thin wrapper over a tokio semaphore handing out owned permits, so a slot is
//! released on drop no matter how the holder exits.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
#[error("concurrency limiter closed")]
pub struct LimiterClosed;

/// Bounds the number of in-flight calls to one dependency.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a free slot. The returned permit releases it when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, LimiterClosed> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
