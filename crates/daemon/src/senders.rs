//! Placeholder platform adapters
//!
//! The real chat/social API clients live in the bot crates and are injected
//! at deployment. Until a sender is configured, every attempt fails
//! permanently so misconfigured messages never retry forever.

use async_trait::async_trait;

use streamgate_core::domain::{AccessCredential, MessagePayload, Platform};
use streamgate_core::port::{
    PlatformSender, RefreshError, RefreshedCredential, SendError, TokenRefresher,
};

pub struct UnconfiguredSender;

#[async_trait]
impl PlatformSender for UnconfiguredSender {
    async fn send(
        &self,
        _tenant_id: &str,
        platform: Platform,
        _payload: &MessagePayload,
    ) -> Result<(), SendError> {
        Err(SendError::Permanent(format!(
            "no sender configured for platform {}",
            platform
        )))
    }
}

pub struct UnconfiguredRefresher;

#[async_trait]
impl TokenRefresher for UnconfiguredRefresher {
    async fn refresh(
        &self,
        platform: Platform,
        _refresh_credential: &AccessCredential,
    ) -> Result<RefreshedCredential, RefreshError> {
        Err(RefreshError::Transient(format!(
            "no refresher configured for platform {}",
            platform
        )))
    }
}
