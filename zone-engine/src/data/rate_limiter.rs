//! Token bucket rate limiter for the price history feed.
//!
//! Public chart APIs throttle aggressively; requests are spaced proactively
//! instead of waiting for 429 responses.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket holding up to one second's worth of requests.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` on average.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let refill_per_sec = requests_per_minute as f64 / 60.0;
        let capacity = refill_per_sec.ceil().max(1.0);

        Self {
            name: name.into(),
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket capacity in whole requests.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        self.take().is_none()
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while let Some(wait) = self.take() {
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Refill, then either take a token (`None`) or report how long to wait.
    fn take(&self) -> Option<Duration> {
        let Ok(mut bucket) = self.bucket.lock() else {
            // A poisoned bucket should not stall the feed
            return None;
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(missing / self.refill_per_sec);
            Some(wait.clamp(Duration::from_millis(10), Duration::from_secs(1)))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_one_second_of_requests() {
        assert_eq!(RateLimiter::new("test", 300).capacity(), 5);
        assert_eq!(RateLimiter::new("test", 30).capacity(), 1);
    }

    #[test]
    fn test_try_acquire_exhausts_bucket() {
        let limiter = RateLimiter::new("test", 60);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("test", 6000);
        while limiter.try_acquire() {}

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
