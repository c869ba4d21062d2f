//! Rate Limiter (Token Bucket)
//!
//! Caps mutating RPC traffic so a misbehaving dashboard cannot flood the
//! store.

use std::sync::Mutex;
use std::time::Instant;

/// Token bucket rate limiter
pub struct RateLimiter {
    state: Mutex<BucketState>,
    max_tokens: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// # Arguments
    /// * `max_tokens` - Maximum burst size
    /// * `refill_per_sec` - Tokens added per second
    pub fn new(max_tokens: u32, refill_per_sec: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: max_tokens as f64,
                last_refill: Instant::now(),
            }),
            max_tokens: max_tokens as f64,
            refill_per_sec: refill_per_sec as f64,
        }
    }

    /// Consume one token. Returns false when the bucket is empty.
    pub fn check(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_allows_within_burst() {
        let limiter = RateLimiter::new(10, 10);
        for _ in 0..10 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 10); // 10 tokens/sec
        for _ in 0..5 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());

        sleep(Duration::from_millis(500)).await;
        assert!(limiter.check());
    }

    #[test]
    fn test_burst_never_exceeded() {
        let limiter = RateLimiter::new(3, 1_000);
        std::thread::sleep(std::time::Duration::from_millis(50));
        // Refill is capped at the burst size
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.check() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }
}
