// Job Executor Port
// One implementation per JobKind discriminator, registered with the scheduler.

use async_trait::async_trait;

use crate::domain::Job;
use crate::error::Result;

/// Executes one kind of control job.
///
/// Any `Err` counts as a failed run: one-shot jobs consume retry budget,
/// recurring jobs reschedule regardless.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Fail N times, then succeed
        FailTimes(usize),
    }

    /// Mock Job Executor for testing
    pub struct MockJobExecutor {
        behavior: Arc<Mutex<MockBehavior>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockJobExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobExecutor for MockJobExecutor {
        async fn execute(&self, _job: &Job) -> Result<()> {
            let calls = {
                let mut count = self.call_count.lock().unwrap();
                *count += 1;
                *count
            };

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Success => Ok(()),
                MockBehavior::Fail(msg) => Err(AppError::Internal(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::FailTimes(n) => {
                    if calls <= n {
                        Err(AppError::Internal(format!("induced failure {}", calls)))
                    } else {
                        Ok(())
                    }
                }
            }
        }
    }
}
