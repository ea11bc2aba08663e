//! Token-bucket limiter shared by all outbound submissions.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Sustained `rate` acquisitions per second with up to `burst` at once. Callers queue in
/// arrival order: each acquisition reserves its slot, then sleeps until the slot comes due.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last = now;
    }

    /// Take one token and return how long the caller has to wait for it.
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    /// Give back a token reserved by a caller that stopped waiting.
    fn refund(&self) {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }

    /// Wait until a token is available. Dropping the future before it completes returns the
    /// reserved token.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if wait.is_zero() {
            return;
        }
        let reservation = Reservation { limiter: self };
        tokio::time::sleep(wait).await;
        std::mem::forget(reservation);
    }
}

/// Refunds the token unless forgotten once the wait completes.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.limiter.refund();
    }
}
