//! Per-key token-bucket rate limiter.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit key must not be empty")]
    EmptyKey,
}

struct TokenBucket {
    tokens: f64,
    last: Instant,
}

/// Per-key token bucket. All state lives behind a single exclusive lock.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: u32) -> Self {
        Self {
            rate: if rate <= 0.0 { 1.0 } else { rate },
            capacity: if capacity == 0 { 1.0 } else { capacity as f64 },
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Allow or deny a request for `key`, refilling tokens based on elapsed time.
    pub fn allow(&self, key: &str) -> Result<bool, RateLimitError> {
        if key.is_empty() {
            return Err(RateLimitError::EmptyKey);
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        let bucket = match buckets.get_mut(key) {
            None => {
                buckets.insert(
                    key.to_string(),
                    TokenBucket {
                        tokens: self.capacity - 1.0,
                        last: now,
                    },
                );
                return Ok(true);
            }
            Some(b) => b,
        };

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        let refill = (elapsed * self.rate).floor();
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);
        bucket.last = now;

        if bucket.tokens > 0.0 {
            bucket.tokens -= 1.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Evict the bucket for `key`, if any.
    pub fn reset(&self, key: &str) {
        self.buckets.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_rejected() {
        let limiter = RateLimiter::new(1.0, 5);
        assert!(matches!(limiter.allow(""), Err(RateLimitError::EmptyKey)));
    }

    #[test]
    fn zero_rate_and_capacity_normalize() {
        let limiter = RateLimiter::new(0.0, 0);
        assert!(limiter.allow("k").unwrap());
    }

    #[test]
    fn exactly_capacity_allowed_then_denied() {
        // Rate is small enough that the bucket cannot refill within the test.
        let limiter = RateLimiter::new(0.001, 2);
        assert!(limiter.allow("10.0.0.1:5678").unwrap());
        assert!(limiter.allow("10.0.0.1:5678").unwrap());
        assert!(!limiter.allow("10.0.0.1:5678").unwrap());
    }

    #[test]
    fn reset_clears_bucket() {
        let limiter = RateLimiter::new(0.001, 1);
        assert!(limiter.allow("k").unwrap());
        assert!(!limiter.allow("k").unwrap());
        limiter.reset("k");
        assert!(limiter.allow("k").unwrap());
    }

    #[test]
    fn sequential_allow_count_matches_capacity() {
        let limiter = RateLimiter::new(0.0001, 3);
        let allowed = (0..10).filter(|_| limiter.allow("k").unwrap()).count();
        assert_eq!(allowed, 3);
    }
}
