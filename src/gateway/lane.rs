//! Process-wide single lane for model calls

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::NotKeyed};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared requests-per-minute limiter
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a limiter with the given requests-per-minute budget
#[must_use]
pub fn create_limiter(requests_per_minute: u32) -> SharedLimiter {
    let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))
}

/// Runs model calls one at a time, first come first served
///
/// A call starts no earlier than `spacing` after the previous one finished.
/// The optional limiter caps calls per minute on top of that.
pub struct DispatchLane {
    spacing: Duration,
    /// Completion time of the last call; the lock is the lane itself
    last_finished: Mutex<Option<Instant>>,
    limiter: Option<SharedLimiter>,
}

impl DispatchLane {
    #[must_use]
    pub fn new(spacing: Duration, requests_per_minute: Option<u32>) -> Self {
        Self {
            spacing,
            last_finished: Mutex::new(None),
            limiter: requests_per_minute.map(create_limiter),
        }
    }

    /// Run `call` once the lane is free and the spacing has elapsed
    pub async fn run<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // tokio's Mutex queues waiters in FIFO order
        let mut last_finished = self.last_finished.lock().await;

        if let Some(finished) = *last_finished {
            let ready_at = finished + self.spacing;
            if ready_at > Instant::now() {
                tracing::debug!(wait_ms = (ready_at - Instant::now()).as_millis(), "waiting for dispatch lane");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let output = call().await;
        *last_finished = Some(Instant::now());
        output
    }
}
