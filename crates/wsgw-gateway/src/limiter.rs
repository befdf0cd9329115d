//! Token-bucket gate applied to all backend-to-client pushes.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Burst capacity of the push token bucket.
pub const PUSH_BURST: u32 = 8;

/// Refill interval of the push token bucket: one token per interval.
pub const PUSH_REFILL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared token bucket gating the push path.
///
/// One bucket per gateway process, shared across all sessions and
/// independent of which connection a push targets. It gates only
/// backend-to-client pushes, never the inbound relay. Acquisition waits
/// without a deadline: a push stalls behind the limiter rather than failing,
/// which is intentional backpressure against the backend.
///
/// There is no per-connection fairness guarantee, only eventual fairness
/// through token availability.
pub struct PushLimiter {
    bucket: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl PushLimiter {
    /// Create a limiter with the default quota (capacity 8, one token per
    /// 100 ms).
    pub fn new() -> Self {
        Self::with_quota(PUSH_BURST, PUSH_REFILL_INTERVAL)
            .expect("default push quota has non-zero burst and period")
    }

    /// Create a limiter with a custom quota. Returns `None` if `burst` is
    /// zero or `refill` is a zero duration.
    pub fn with_quota(burst: u32, refill: Duration) -> Option<Self> {
        let quota = Quota::with_period(refill)?.allow_burst(NonZeroU32::new(burst)?);
        Some(Self {
            bucket: RateLimiter::direct(quota),
        })
    }

    /// Take one token, waiting as long as it takes for one to become
    /// available.
    pub async fn acquire(&self) {
        self.bucket.until_ready().await;
    }
}

impl Default for PushLimiter {
    fn default() -> Self {
        Self::new()
    }
}
