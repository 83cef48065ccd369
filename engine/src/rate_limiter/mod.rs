//! Rate limiting module
//!
//! Sliding-window admission gate for model calls. One `RateLimiter` is built
//! per process and shared (`Arc<RateLimiter>`) by every invoker, so the
//! ceiling holds across concurrent runs.
//!
//! # Algorithm
//!
//! The limiter keeps the timestamps of the most recent admissions. On each
//! request it:
//!
//! 1. Drops timestamps older than the window (one second)
//! 2. If the window is full, sleeps until the oldest timestamp leaves it,
//!    then drops stale timestamps again
//! 3. Records the current instant and admits the caller
//!
//! The whole sequence runs under one async mutex, held across the sleep, so
//! admissions are serialized and the ceiling cannot be overshot by racing
//! callers. Waiters queue on the mutex in FIFO order.
//!
//! # Cancellation
//!
//! Waiting is preemptible: if the caller's `CancellationToken` fires while it
//! is queued or sleeping, `admit` returns `EngineError::Cancelled` and records
//! nothing.

use sdk::errors::EngineError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default admissions per rolling second
pub const DEFAULT_QPS: usize = 40;

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window limiter shared by every model invocation
pub struct RateLimiter {
    qps: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `qps` calls per rolling second.
    /// A ceiling of 0 is treated as 1.
    pub fn new(qps: usize) -> Self {
        Self::with_window(qps, WINDOW)
    }

    /// Create a limiter with a custom window length
    pub fn with_window(qps: usize, window: Duration) -> Self {
        let qps = qps.max(1);
        Self {
            qps,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(qps)),
        }
    }

    pub fn qps(&self) -> usize {
        self.qps
    }

    /// Suspend until the caller may proceed
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut admitted = tokio::select! {
            guard = self.admitted.lock() => guard,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let now = Instant::now();
        Self::prune(&mut admitted, now, self.window);

        if admitted.len() >= self.qps {
            if let Some(oldest) = admitted.front().copied() {
                let ready_at = oldest + self.window;
                debug!(
                    "Rate limit window full ({}/{}), waiting {:?}",
                    admitted.len(),
                    self.qps,
                    ready_at.saturating_duration_since(now)
                );

                tokio::select! {
                    _ = tokio::time::sleep_until(ready_at) => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }

                Self::prune(&mut admitted, Instant::now(), self.window);
            }
        }

        admitted.push_back(Instant::now());
        Ok(())
    }

    /// Number of admissions currently inside the window
    pub async fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        Self::prune(&mut admitted, Instant::now(), self.window);
        admitted.len()
    }

    fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = admitted.front() {
            if now.duration_since(*front) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_QPS)
    }
}
