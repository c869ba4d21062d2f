// Platform Send Capability Port
// One implementation per third-party API, supplied externally. The resilience
// layer only sees the error taxonomy.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{MessagePayload, Platform};

/// Send failure classification.
///
/// The class decides what happens next: transient failures feed the circuit
/// and retry with backoff, rate limits feed the throttle window only, auth
/// failures are routed to token lifecycle handling, permanent failures are
/// terminal for the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("transient platform failure: {0}")]
    Transient(String),

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<i64> },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),
}

/// Platform send capability
#[async_trait]
pub trait PlatformSender: Send + Sync {
    /// Deliver one payload on behalf of a tenant.
    ///
    /// Implementations resolve the tenant's credential themselves; a rejected
    /// credential must surface as `SendError::Auth`.
    async fn send(
        &self,
        tenant_id: &str,
        platform: Platform,
        payload: &MessagePayload,
    ) -> Result<(), SendError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::TenantId;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scriptable sender: per-platform outcome queues with a default outcome
    /// once a queue runs dry. Records every attempted send.
    pub struct MockPlatformSender {
        script: Mutex<HashMap<Platform, VecDeque<Result<(), SendError>>>>,
        default: Mutex<Result<(), SendError>>,
        sent: Mutex<Vec<(TenantId, Platform, MessagePayload)>>,
    }

    impl MockPlatformSender {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                default: Mutex::new(Ok(())),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// Queue the next outcome for a platform (FIFO)
        pub fn push_outcome(&self, platform: Platform, outcome: Result<(), SendError>) {
            self.script
                .lock()
                .unwrap()
                .entry(platform)
                .or_default()
                .push_back(outcome);
        }

        /// Outcome returned once the scripted queue is empty
        pub fn set_default(&self, outcome: Result<(), SendError>) {
            *self.default.lock().unwrap() = outcome;
        }

        /// Every attempt, in order (including failed ones)
        pub fn attempts(&self) -> Vec<(TenantId, Platform, MessagePayload)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn attempt_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Default for MockPlatformSender {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PlatformSender for MockPlatformSender {
        async fn send(
            &self,
            tenant_id: &str,
            platform: Platform,
            payload: &MessagePayload,
        ) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((tenant_id.to_string(), platform, payload.clone()));

            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(&platform)
                .and_then(|queue| queue.pop_front());

            match scripted {
                Some(outcome) => outcome,
                None => self.default.lock().unwrap().clone(),
            }
        }
    }
}
