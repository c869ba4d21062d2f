// Token Domain Model
//
// Credentials are opaque to this layer; the refresh handshake itself lives
// behind the TokenRefresher port.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::platform::Platform;
use crate::domain::TenantId;

/// Tokens closer than this to expiry classify as expiring_soon (24h)
pub const EXPIRING_SOON_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Opaque credential. Debug output is redacted so tokens never leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw secret; only adapters handing it to a platform client
    /// should call this
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCredential([redacted])")
    }
}

/// Health classification of a token record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenHealth {
    /// Expiry more than 24h out
    Healthy,
    /// Expiry within 24h
    ExpiringSoon,
    /// Past expiry with a refresh credential present (lazily retried)
    Expired,
    /// No usable refresh credential, or refresh attempts exhausted
    NeedsReauth,
}

impl std::fmt::Display for TokenHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenHealth::Healthy => write!(f, "healthy"),
            TokenHealth::ExpiringSoon => write!(f, "expiring_soon"),
            TokenHealth::Expired => write!(f, "expired"),
            TokenHealth::NeedsReauth => write!(f, "needs_reauth"),
        }
    }
}

/// Per (tenant, platform) credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub access: AccessCredential,
    pub refresh: Option<AccessCredential>,
    pub expires_at: i64,
    pub needs_reauth: bool,
    /// Consecutive failed refresh attempts since the last successful rotation
    pub refresh_failures: i32,
    /// Optimistic-concurrency counter; every credential write bumps it
    pub version: i64,
    pub updated_at: i64,
}

impl TokenRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        platform: Platform,
        access: AccessCredential,
        refresh: Option<AccessCredential>,
        expires_at: i64,
        now: i64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            platform,
            access,
            refresh,
            expires_at,
            needs_reauth: false,
            refresh_failures: 0,
            version: 0,
            updated_at: now,
        }
    }

    /// Classify this record at `now`
    pub fn health(&self, now: i64) -> TokenHealth {
        if self.needs_reauth {
            return TokenHealth::NeedsReauth;
        }
        if now >= self.expires_at {
            return if self.refresh.is_some() {
                TokenHealth::Expired
            } else {
                TokenHealth::NeedsReauth
            };
        }
        if self.expires_at - now < EXPIRING_SOON_WINDOW_MS {
            TokenHealth::ExpiringSoon
        } else {
            TokenHealth::Healthy
        }
    }

    /// Usable for outbound sends right now (not expired, not awaiting re-auth)
    pub fn is_usable(&self, now: i64) -> bool {
        matches!(
            self.health(now),
            TokenHealth::Healthy | TokenHealth::ExpiringSoon
        )
    }
}

/// Outcome of one rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationOutcome {
    Rotated,
    Failed,
}

impl std::fmt::Display for RotationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationOutcome::Rotated => write!(f, "rotated"),
            RotationOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RotationOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotated" => Ok(RotationOutcome::Rotated),
            "failed" => Ok(RotationOutcome::Failed),
            other => Err(DomainError::ValidationError(format!(
                "invalid rotation outcome: {}",
                other
            ))),
        }
    }
}

/// Append-only rotation history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEntry {
    pub id: String,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub rotated_at: i64,
    pub outcome: RotationOutcome,
    pub detail: Option<String>,
}

/// Alert conditions; dedup key together with (tenant, platform)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Token close to expiry with no way to rotate it
    ExpiryImminent,
    /// Refresh attempt failed (transient or otherwise)
    RotationFailed,
    /// Grant revoked or refresh budget exhausted; operator action required
    ReauthRequired,
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCondition::ExpiryImminent => write!(f, "expiry_imminent"),
            AlertCondition::RotationFailed => write!(f, "rotation_failed"),
            AlertCondition::ReauthRequired => write!(f, "reauth_required"),
        }
    }
}

impl std::str::FromStr for AlertCondition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expiry_imminent" => Ok(AlertCondition::ExpiryImminent),
            "rotation_failed" => Ok(AlertCondition::RotationFailed),
            "reauth_required" => Ok(AlertCondition::ReauthRequired),
            other => Err(DomainError::ValidationError(format!(
                "invalid alert condition: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(DomainError::ValidationError(format!(
                "invalid alert severity: {}",
                other
            ))),
        }
    }
}

/// Operator-facing token alert; acknowledged by an operator, never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAlert {
    pub id: String,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn record(expires_at: i64, refresh: bool) -> TokenRecord {
        TokenRecord::new(
            "tenant-a",
            Platform::Twitch,
            AccessCredential::new("access"),
            refresh.then(|| AccessCredential::new("refresh")),
            expires_at,
            0,
        )
    }

    #[test]
    fn test_health_classification() {
        let now = 100 * HOUR_MS;

        // > 24h out
        assert_eq!(record(now + 48 * HOUR_MS, true).health(now), TokenHealth::Healthy);
        // < 24h out
        assert_eq!(
            record(now + 2 * HOUR_MS, true).health(now),
            TokenHealth::ExpiringSoon
        );
        // past expiry, refresh present
        assert_eq!(record(now - HOUR_MS, true).health(now), TokenHealth::Expired);
        // past expiry, no refresh credential
        assert_eq!(
            record(now - HOUR_MS, false).health(now),
            TokenHealth::NeedsReauth
        );
    }

    #[test]
    fn test_needs_reauth_flag_dominates() {
        let now = 100 * HOUR_MS;
        let mut rec = record(now + 48 * HOUR_MS, true);
        rec.needs_reauth = true;
        assert_eq!(rec.health(now), TokenHealth::NeedsReauth);
        assert!(!rec.is_usable(now));
    }

    #[test]
    fn test_usable_states() {
        let now = 100 * HOUR_MS;
        assert!(record(now + 48 * HOUR_MS, true).is_usable(now));
        assert!(record(now + 2 * HOUR_MS, true).is_usable(now));
        assert!(!record(now - HOUR_MS, true).is_usable(now));
    }

    #[test]
    fn test_credential_debug_redacted() {
        let cred = AccessCredential::new("super-secret");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert_eq!(cred.expose(), "super-secret");
    }
}
