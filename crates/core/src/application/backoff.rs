// Exponential backoff shared by message retries and job retries

/// Exponential backoff with a deterministic per-key jitter.
///
/// delay = base * factor^attempt, capped at max, then jittered ±10%. The
/// jitter is derived from the record id so retry schedules stay reproducible
/// in tests while still spreading a burst of failures (thundering herd).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay_ms: i64,
    factor: f64,
    max_delay_ms: i64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: i64, factor: f64, max_delay_ms: i64) -> Self {
        Self {
            base_delay_ms,
            factor,
            max_delay_ms,
        }
    }

    /// Delay before attempt number `attempt` (1-based: the first retry is
    /// attempt 1)
    pub fn delay_for_attempt(&self, key: &str, attempt: i32) -> i64 {
        let exponent = attempt.saturating_sub(1).max(0);
        let raw = self.base_delay_ms as f64 * self.factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        // Deterministic ±10% jitter seeded from the key
        let seed = key.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((seed % 21) as f64 / 100.0); // 0.9 to 1.1

        ((capped * jitter_factor) as i64).min(self.max_delay_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(1_000, 2.0, 5 * 60 * 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = BackoffPolicy::new(1_000, 2.0, 60_000);
        let d1 = policy.delay_for_attempt("msg", 1);
        let d2 = policy.delay_for_attempt("msg", 2);
        let d3 = policy.delay_for_attempt("msg", 3);
        // Same key, same jitter: ratios are exact
        assert_eq!(d2, d1 * 2);
        assert_eq!(d3, d1 * 4);
    }

    #[test]
    fn test_backoff_capped() {
        let policy = BackoffPolicy::new(1_000, 2.0, 8_000);
        assert!(policy.delay_for_attempt("msg", 30) <= 8_000);
    }

    #[test]
    fn test_jitter_deterministic_per_key() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_for_attempt("abc", 2),
            policy.delay_for_attempt("abc", 2)
        );
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        let policy = BackoffPolicy::new(10_000, 2.0, 600_000);
        for key in ["a", "bb", "ccc", "dddd", "e-5"] {
            let delay = policy.delay_for_attempt(key, 1);
            assert!((9_000..=11_000).contains(&delay), "delay {}", delay);
        }
    }
}
