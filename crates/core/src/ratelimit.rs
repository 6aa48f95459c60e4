//! Rate limiter shared by every run using the same client adapter.
//!
//! Callers are queued, never rejected: a semaphore bounds in-flight
//! requests and a reserved time slot enforces minimum spacing between them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// No spacing, effectively unbounded concurrency.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, Duration::ZERO)
    }

    /// Wait for a free slot. Fails only if the limiter was closed.
    pub async fn acquire(&self) -> Result<RatePermit, AcquireError> {
        let permit = self.permits.clone().acquire_owned().await?;

        if !self.min_interval.is_zero() {
            let slot = {
                let mut next = self.next_slot.lock().await;
                let now = Instant::now();
                let slot = next.map_or(now, |reserved| reserved.max(now));
                *next = Some(slot + self.min_interval);
                slot
            };
            if slot > Instant::now() {
                debug!(
                    wait_ms = (slot - Instant::now()).as_millis() as u64,
                    "Rate limiter spacing request"
                );
                tokio::time::sleep_until(slot).await;
            }
        }

        Ok(RatePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(4, Duration::ZERO)
    }
}
