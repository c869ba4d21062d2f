// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::TimeProvider;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Manually-advanced clock for deterministic tests
    pub struct MockTimeProvider {
        now: AtomicI64,
    }

    impl MockTimeProvider {
        pub fn new(start: i64) -> Self {
            Self {
                now: AtomicI64::new(start),
            }
        }

        pub fn advance(&self, delta_ms: i64) {
            self.now.fetch_add(delta_ms, Ordering::SeqCst);
        }

        pub fn set(&self, now_ms: i64) {
            self.now.store(now_ms, Ordering::SeqCst);
        }
    }

    impl TimeProvider for MockTimeProvider {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}
