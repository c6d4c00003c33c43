//! Token-bucket admission control for outbound requests.
//!
//! The bucket starts full with `round(permits_per_second)` tokens (at
//! least one) and refills lazily on every acquisition from the wall-clock
//! time elapsed since the previous refill. There is no background timer.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Error;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Thread-safe token bucket.
///
/// [`acquire`](Self::acquire) blocks the calling OS thread and must not be
/// used from a UI or async executor thread; async call sites use
/// [`acquire_async`](Self::acquire_async).
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    refilled: Condvar,
    capacity: f64,
    tokens_per_nano: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(permits_per_second: f64) -> Result<Self, Error> {
        if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
            return Err(Error::InvalidRate(permits_per_second));
        }

        let capacity = permits_per_second.round().max(1.0);

        Ok(Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            refilled: Condvar::new(),
            capacity,
            tokens_per_nano: permits_per_second / NANOS_PER_SECOND,
        })
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Block until a token is available, then consume it.
    pub fn acquire(&self) {
        let mut bucket = self.lock();
        loop {
            match self.take(&mut bucket) {
                Ok(()) => return,
                Err(wait) => {
                    // Refill is recomputed after waking, so spurious
                    // wake-ups only cost another loop iteration.
                    bucket = match self.refilled.wait_timeout(bucket, wait) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }
    }

    /// Take a token without blocking. On failure returns how long the
    /// caller should wait before a token becomes available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.lock();
        self.take(&mut bucket)
    }

    /// Async variant of [`acquire`](Self::acquire): sleeps on the tokio
    /// timer instead of blocking the worker thread.
    pub async fn acquire_async(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, bucket: &mut Bucket) -> Result<(), Duration> {
        self.refill(bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - bucket.tokens;
        let nanos = (deficit / self.tokens_per_nano).ceil().max(1.0);
        Err(Duration::from_nanos(nanos as u64))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_nanos() as f64;
        bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_nano).min(self.capacity);
        bucket.last_refill = now;
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rejects_invalid_rates() {
        assert!(matches!(RateLimiter::new(0.0), Err(Error::InvalidRate(_))));
        assert!(matches!(RateLimiter::new(-3.0), Err(Error::InvalidRate(_))));
        assert!(matches!(RateLimiter::new(f64::NAN), Err(Error::InvalidRate(_))));
        assert!(matches!(RateLimiter::new(f64::INFINITY), Err(Error::InvalidRate(_))));
    }

    #[test]
    fn capacity_is_rounded_with_floor_of_one() {
        assert!((RateLimiter::new(0.2).unwrap().capacity() - 1.0).abs() < f64::EPSILON);
        assert!((RateLimiter::new(2.6).unwrap().capacity() - 3.0).abs() < f64::EPSILON);
        assert!((RateLimiter::new(10.0).unwrap().capacity() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn burst_then_throttle() {
        let limiter = RateLimiter::new(10.0).unwrap();

        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire();
        }
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "cold-start burst should not wait, took {:?}",
            start.elapsed()
        );

        let before = Instant::now();
        limiter.acquire();
        let waited = before.elapsed();
        assert!(
            waited >= Duration::from_millis(80),
            "11th permit should wait about 100ms, waited {waited:?}"
        );
    }

    #[test]
    fn try_acquire_reports_wait() {
        let limiter = RateLimiter::new(1.0).unwrap();
        assert!(limiter.try_acquire().is_ok());

        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait > Duration::from_millis(900));
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn concurrent_acquirers_share_the_budget() {
        let limiter = Arc::new(RateLimiter::new(20.0).unwrap());
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..6 {
                        limiter.acquire();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 24 permits at 20/s with a 20-token burst: 4 must wait ~50ms each.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn async_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(50.0).unwrap();
        for _ in 0..50 {
            limiter.acquire_async().await;
        }

        let before = Instant::now();
        limiter.acquire_async().await;
        assert!(before.elapsed() >= Duration::from_millis(10));
    }
}
