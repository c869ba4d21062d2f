// Platform Refresh Capability Port
// The OAuth handshake itself is out of scope; the lifecycle manager only sees
// a refresh call that yields a new credential or a classified failure.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AccessCredential, Platform};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Network/5xx/timeout; retried on the next sweep
    #[error("transient refresh failure: {0}")]
    Transient(String),

    /// Grant revoked or otherwise unusable; re-authorization required
    #[error("refresh grant revoked: {0}")]
    Revoked(String),
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub access: AccessCredential,
    /// Some providers rotate the refresh credential too
    pub refresh: Option<AccessCredential>,
    /// Credential lifetime from now (ms)
    pub expires_in_ms: i64,
}

/// Platform refresh capability
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        platform: Platform,
        refresh_credential: &AccessCredential,
    ) -> Result<RefreshedCredential, RefreshError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scriptable refresher with a FIFO outcome queue and a default outcome
    pub struct MockTokenRefresher {
        script: Mutex<VecDeque<Result<RefreshedCredential, RefreshError>>>,
        default: Mutex<Result<RefreshedCredential, RefreshError>>,
        call_count: Mutex<usize>,
    }

    impl MockTokenRefresher {
        /// Defaults to granting a fresh 48h credential
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default: Mutex::new(Ok(Self::fresh_credential())),
                call_count: Mutex::new(0),
            }
        }

        pub fn fresh_credential() -> RefreshedCredential {
            RefreshedCredential {
                access: AccessCredential::new("rotated-access"),
                refresh: Some(AccessCredential::new("rotated-refresh")),
                expires_in_ms: 48 * 60 * 60 * 1000,
            }
        }

        pub fn push_outcome(&self, outcome: Result<RefreshedCredential, RefreshError>) {
            self.script.lock().unwrap().push_back(outcome);
        }

        pub fn set_default(&self, outcome: Result<RefreshedCredential, RefreshError>) {
            *self.default.lock().unwrap() = outcome;
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    impl Default for MockTokenRefresher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TokenRefresher for MockTokenRefresher {
        async fn refresh(
            &self,
            _platform: Platform,
            _refresh_credential: &AccessCredential,
        ) -> Result<RefreshedCredential, RefreshError> {
            *self.call_count.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(outcome) => outcome,
                None => self.default.lock().unwrap().clone(),
            }
        }
    }
}
