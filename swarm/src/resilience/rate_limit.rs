//! Token-bucket rate limiter.
//!
//! Degenerate configurations (zero capacity, zero refill) are sanitized
//! to defaults that keep `acquire()` returning promptly; a limiter must
//! never be able to hang its caller forever.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Error, Result};

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_REFILL_PER_SECOND: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket: `capacity` burst, steady refill.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests_per_minute`, refilling
    /// evenly across the minute.
    ///
    /// A zero rate is sanitized to 60/min.
    #[must_use]
    pub fn per_minute(max_requests_per_minute: u32) -> Self {
        let rate = if max_requests_per_minute == 0 {
            warn!("max_requests_per_minute of 0 sanitized to {DEFAULT_REQUESTS_PER_MINUTE}");
            DEFAULT_REQUESTS_PER_MINUTE
        } else {
            max_requests_per_minute
        };
        Self::with_refill_rate(f64::from(rate), f64::from(rate) / 60.0)
    }

    /// Create a limiter with an explicit capacity and refill rate in
    /// tokens per second.
    ///
    /// Non-positive values are sanitized: capacity to 1, refill rate to
    /// 1 token/sec.
    #[must_use]
    pub fn with_refill_rate(capacity: f64, refill_per_second: f64) -> Self {
        let capacity = if capacity > 0.0 {
            capacity
        } else {
            warn!("non-positive capacity sanitized to 1");
            1.0
        };
        let refill_per_second = if refill_per_second > 0.0 {
            refill_per_second
        } else {
            warn!("non-positive refill rate sanitized to {DEFAULT_REFILL_PER_SECOND}/s");
            DEFAULT_REFILL_PER_SECOND
        };
        Self {
            capacity,
            refill_per_second,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Sleep exactly long enough for the next token to land.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_second)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token without waiting.
    ///
    /// # Errors
    ///
    /// [`Error::RateLimitExceeded`] when no token is available.
    pub fn try_acquire(&self) -> Result<()> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Error::RateLimitExceeded)
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.last_refill.elapsed();
        bucket.last_refill = Instant::now();
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_per_minute_does_not_hang() {
        let limiter = RateLimiter::per_minute(0);
        // Sanitized to a full bucket; the first acquire is immediate.
        tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("acquire completes within one second");
    }

    #[tokio::test]
    async fn zero_refill_rate_does_not_hang() {
        let limiter = RateLimiter::with_refill_rate(1.0, 0.0);
        tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("first token is available");
        // The sanitized refill rate keeps the second acquire prompt too.
        tokio::time::timeout(Duration::from_secs(2), limiter.acquire())
            .await
            .expect("refill keeps flowing");
    }

    #[tokio::test]
    async fn try_acquire_rejects_when_empty() {
        let limiter = RateLimiter::with_refill_rate(1.0, 0.001);
        limiter.try_acquire().expect("bucket starts full");
        assert!(limiter.try_acquire().is_err());
    }

    #[tokio::test]
    async fn burst_up_to_capacity() {
        let limiter = RateLimiter::with_refill_rate(3.0, 0.001);
        for _ in 0..3 {
            limiter.try_acquire().expect("burst within capacity");
        }
        assert!(limiter.try_acquire().is_err());
    }
}
