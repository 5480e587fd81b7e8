//! Token-bucket rate limiting for ingestion entry points.
//!
//! The bucket holds `capacity` tokens and refills continuously at
//! `capacity` per minute. Each ingested file consumes one token; an empty
//! bucket raises a retryable [`Error::QuotaExceeded`].

use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Error, Result};

/// Continuous-refill token bucket.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket with the given per-minute capacity, starting full.
    #[must_use]
    pub fn per_minute(capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] with the seconds until a token is
    /// available when the bucket is empty.
    pub fn try_acquire(&self) -> Result<()> {
        self.try_acquire_at(Instant::now())
    }

    /// Takes one token as of the given instant (deterministic for tests).
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] when the bucket is empty.
    pub fn try_acquire_at(&self, now: Instant) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::invariant("quota mutex poisoned"))?;

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens < 1.0 {
            let deficit = 1.0 - state.tokens;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_after_secs = (deficit / self.refill_per_sec).ceil() as u64;
            return Err(Error::QuotaExceeded {
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        state.tokens -= 1.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::per_minute(5);
        let now = Instant::now();
        for _ in 0..5 {
            bucket.try_acquire_at(now).unwrap();
        }
        let err = bucket.try_acquire_at(now).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::per_minute(60); // one token per second
        let start = Instant::now();
        for _ in 0..60 {
            bucket.try_acquire_at(start).unwrap();
        }
        assert!(bucket.try_acquire_at(start).is_err());

        // Two seconds later two tokens are back.
        let later = start + Duration::from_secs(2);
        bucket.try_acquire_at(later).unwrap();
        bucket.try_acquire_at(later).unwrap();
        assert!(bucket.try_acquire_at(later).is_err());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::per_minute(2);
        let start = Instant::now();
        // A long idle period must not bank more than `capacity` tokens.
        let later = start + Duration::from_secs(3600);
        bucket.try_acquire_at(later).unwrap();
        bucket.try_acquire_at(later).unwrap();
        assert!(bucket.try_acquire_at(later).is_err());
    }

    #[test]
    fn test_retry_after_is_positive() {
        let bucket = TokenBucket::per_minute(1);
        let now = Instant::now();
        bucket.try_acquire_at(now).unwrap();
        match bucket.try_acquire_at(now).unwrap_err() {
            Error::QuotaExceeded { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
