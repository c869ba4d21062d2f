// Token Lifecycle Manager - proactive credential rotation and alerting
//
// Rotation per (tenant, platform) is single-flight: a second attempt while
// one is in flight is rejected, not queued, so two refreshes can never
// invalidate each other. Credential writes are version-guarded CAS.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    AlertCondition, AlertSeverity, Platform, RotationEntry, RotationOutcome, TenantId, TokenAlert,
    TokenHealth, TokenRecord,
};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, Notification, Notifier, RefreshError, TimeProvider, TokenRefresher,
    TokenRepository,
};

/// Token lifecycle tuning
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Rotate this long before expiry (ms)
    pub refresh_lead_ms: i64,
    /// Bounded timeout around one refresh call (ms)
    pub refresh_timeout_ms: u64,
    /// Consecutive refresh failures before the record needs re-auth
    pub max_refresh_failures: i32,
    /// Suppress duplicate alerts for an unresolved condition within this
    /// window (ms)
    pub alert_cooldown_ms: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_lead_ms: 60 * 60 * 1_000,
            refresh_timeout_ms: 10_000,
            max_refresh_failures: 3,
            alert_cooldown_ms: 6 * 60 * 60 * 1_000,
        }
    }
}

/// Per-platform entry of the operator dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDashboardEntry {
    pub platform: Platform,
    pub health: TokenHealth,
    pub expires_at: i64,
    pub needs_reauth: bool,
    pub refresh_failures: i32,
    pub updated_at: i64,
}

/// Operator dashboard for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDashboard {
    pub tenant_id: TenantId,
    pub entries: Vec<TokenDashboardEntry>,
    pub pending_alerts: i64,
}

/// Result of an explicit expiry check over one tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenExpirySummary {
    pub healthy: usize,
    pub expiring_soon: usize,
    pub expired: usize,
    pub needs_reauth: usize,
    pub rotations_triggered: usize,
}

/// Per-tenant credential expiry tracking, proactive rotation and alerting
pub struct TokenLifecycleManager {
    repo: Arc<dyn TokenRepository>,
    refresher: Arc<dyn TokenRefresher>,
    notifier: Arc<dyn Notifier>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    config: TokenConfig,
    /// Single-flight guard per (tenant, platform)
    in_flight: Mutex<HashSet<(TenantId, Platform)>>,
}

impl TokenLifecycleManager {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        refresher: Arc<dyn TokenRefresher>,
        notifier: Arc<dyn Notifier>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: TokenConfig,
    ) -> Self {
        Self {
            repo,
            refresher,
            notifier,
            time_provider,
            id_provider,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Register or replace a credential (first issuance, or operator re-auth)
    pub async fn store_credential(&self, record: &TokenRecord) -> Result<()> {
        self.repo.upsert(record).await?;
        info!(
            tenant_id = %record.tenant_id,
            platform = %record.platform,
            "credential stored"
        );
        Ok(())
    }

    /// Health classification for one credential
    pub async fn token_health(
        &self,
        tenant_id: &str,
        platform: Platform,
    ) -> Result<Option<TokenHealth>> {
        let now = self.time_provider.now_millis();
        Ok(self
            .repo
            .find(tenant_id, platform)
            .await?
            .map(|record| record.health(now)))
    }

    /// Whether outbound sends may use this credential right now
    pub async fn credential_usable(&self, tenant_id: &str, platform: Platform) -> Result<bool> {
        let now = self.time_provider.now_millis();
        Ok(self
            .repo
            .find(tenant_id, platform)
            .await?
            .map(|record| record.is_usable(now))
            .unwrap_or(false))
    }

    /// Operator dashboard for one tenant
    pub async fn token_dashboard(&self, tenant_id: &str) -> Result<TokenDashboard> {
        let now = self.time_provider.now_millis();
        let records = self.repo.find_by_tenant(tenant_id).await?;
        let entries = records
            .iter()
            .map(|record| TokenDashboardEntry {
                platform: record.platform,
                health: record.health(now),
                expires_at: record.expires_at,
                needs_reauth: record.needs_reauth,
                refresh_failures: record.refresh_failures,
                updated_at: record.updated_at,
            })
            .collect();
        let pending_alerts = self.repo.pending_alerts(tenant_id).await?.len() as i64;

        Ok(TokenDashboard {
            tenant_id: tenant_id.to_string(),
            entries,
            pending_alerts,
        })
    }

    /// Classify every credential of one tenant and proactively rotate those
    /// inside the refresh lead window
    pub async fn check_token_expiry(&self, tenant_id: &str) -> Result<TokenExpirySummary> {
        let now = self.time_provider.now_millis();
        let records = self.repo.find_by_tenant(tenant_id).await?;
        let mut summary = TokenExpirySummary::default();

        for record in records {
            match record.health(now) {
                TokenHealth::Healthy => summary.healthy += 1,
                TokenHealth::ExpiringSoon => summary.expiring_soon += 1,
                TokenHealth::Expired => summary.expired += 1,
                TokenHealth::NeedsReauth => summary.needs_reauth += 1,
            }

            if self.should_rotate(&record, now) {
                match self.rotate(&record.tenant_id, record.platform).await {
                    Ok(()) => summary.rotations_triggered += 1,
                    Err(AppError::Conflict(_)) => {
                        debug!(
                            tenant_id = %record.tenant_id,
                            platform = %record.platform,
                            "rotation already in flight, skipping"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(summary)
    }

    /// Sweep pass over all tenants: rotate every credential inside the lead
    /// window, alert on those that cannot be rotated. Run as a recurring job.
    pub async fn sweep(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let due = self.repo.find_expiring(now + self.config.refresh_lead_ms).await?;
        let mut rotated = 0;

        for record in due {
            if record.refresh.is_none() {
                self.raise_alert(
                    &record.tenant_id,
                    record.platform,
                    AlertCondition::ExpiryImminent,
                    AlertSeverity::Warning,
                    format!(
                        "credential for {} expires soon and has no refresh credential",
                        record.platform
                    ),
                )
                .await?;
                continue;
            }

            match self.rotate(&record.tenant_id, record.platform).await {
                Ok(()) => rotated += 1,
                Err(AppError::Conflict(_)) => {
                    debug!(
                        tenant_id = %record.tenant_id,
                        platform = %record.platform,
                        "rotation already in flight, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        tenant_id = %record.tenant_id,
                        platform = %record.platform,
                        error = %e,
                        "sweep rotation errored"
                    );
                }
            }
        }

        debug!(rotated = rotated, "token sweep complete");
        Ok(rotated)
    }

    /// Routed here by the outbox on a 401-class send failure. Attempts an
    /// immediate rotation when a refresh credential exists; otherwise flags
    /// the record for re-authorization.
    pub async fn report_auth_failure(&self, tenant_id: &str, platform: Platform) -> Result<()> {
        let now = self.time_provider.now_millis();
        let Some(record) = self.repo.find(tenant_id, platform).await? else {
            self.raise_alert(
                tenant_id,
                platform,
                AlertCondition::ReauthRequired,
                AlertSeverity::Critical,
                format!("platform {} rejected a credential that is not on file", platform),
            )
            .await?;
            return Ok(());
        };

        if record.needs_reauth {
            return Ok(());
        }

        if record.refresh.is_some() {
            match self.rotate(tenant_id, platform).await {
                Ok(()) | Err(AppError::Conflict(_)) => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            self.repo
                .record_refresh_failure(tenant_id, platform, record.version, true, now)
                .await?;
            self.raise_alert(
                tenant_id,
                platform,
                AlertCondition::ReauthRequired,
                AlertSeverity::Critical,
                format!(
                    "platform {} rejected the credential and no refresh credential exists",
                    platform
                ),
            )
            .await?;
            Ok(())
        }
    }

    /// Rotate one credential through the external refresh capability.
    ///
    /// Single-flight per (tenant, platform): a concurrent attempt returns
    /// `AppError::Conflict` instead of queueing.
    pub async fn rotate(&self, tenant_id: &str, platform: Platform) -> Result<()> {
        let key = (tenant_id.to_string(), platform);
        if !self.in_flight.lock().unwrap().insert(key.clone()) {
            return Err(AppError::Conflict(format!(
                "rotation already in flight for {}/{}",
                tenant_id, platform
            )));
        }

        let result = self.rotate_inner(tenant_id, platform).await;
        self.in_flight.lock().unwrap().remove(&key);
        result
    }

    async fn rotate_inner(&self, tenant_id: &str, platform: Platform) -> Result<()> {
        let record = self
            .repo
            .find(tenant_id, platform)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no credential for {}/{}", tenant_id, platform))
            })?;

        if record.needs_reauth {
            return Err(AppError::InvalidState(format!(
                "credential for {}/{} awaits re-authorization",
                tenant_id, platform
            )));
        }
        let Some(refresh) = record.refresh.clone() else {
            return Err(AppError::InvalidState(format!(
                "credential for {}/{} has no refresh credential",
                tenant_id, platform
            )));
        };

        let timeout = std::time::Duration::from_millis(self.config.refresh_timeout_ms);
        let outcome = match tokio::time::timeout(
            timeout,
            self.refresher.refresh(platform, &refresh),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(RefreshError::Transient("refresh timed out".to_string())),
        };

        let now = self.time_provider.now_millis();
        match outcome {
            Ok(renewed) => {
                let updated = self
                    .repo
                    .update_credentials(
                        tenant_id,
                        platform,
                        record.version,
                        &renewed.access,
                        renewed.refresh.as_ref(),
                        now + renewed.expires_in_ms,
                        now,
                    )
                    .await?;
                if !updated {
                    warn!(
                        tenant_id = %tenant_id,
                        platform = %platform,
                        "credential changed during rotation, discarding result"
                    );
                    return Err(AppError::Conflict(format!(
                        "credential for {}/{} changed during rotation",
                        tenant_id, platform
                    )));
                }

                self.append_history(tenant_id, platform, now, RotationOutcome::Rotated, None)
                    .await?;
                info!(tenant_id = %tenant_id, platform = %platform, "credential rotated");
                Ok(())
            }
            Err(RefreshError::Revoked(detail)) => {
                self.repo
                    .record_refresh_failure(tenant_id, platform, record.version, true, now)
                    .await?;
                self.append_history(
                    tenant_id,
                    platform,
                    now,
                    RotationOutcome::Failed,
                    Some(detail.clone()),
                )
                .await?;
                self.raise_alert(
                    tenant_id,
                    platform,
                    AlertCondition::ReauthRequired,
                    AlertSeverity::Critical,
                    format!("refresh grant for {} revoked: {}", platform, detail),
                )
                .await?;
                warn!(
                    tenant_id = %tenant_id,
                    platform = %platform,
                    "refresh grant revoked, re-authorization required"
                );
                Ok(())
            }
            Err(RefreshError::Transient(detail)) => {
                let failures = record.refresh_failures + 1;
                let exhausted = failures >= self.config.max_refresh_failures;
                self.repo
                    .record_refresh_failure(tenant_id, platform, record.version, exhausted, now)
                    .await?;
                self.append_history(
                    tenant_id,
                    platform,
                    now,
                    RotationOutcome::Failed,
                    Some(detail.clone()),
                )
                .await?;

                // Severity escalates with repeated failures
                let (condition, severity) = if exhausted {
                    (AlertCondition::ReauthRequired, AlertSeverity::Critical)
                } else if failures > 1 {
                    (AlertCondition::RotationFailed, AlertSeverity::Warning)
                } else {
                    (AlertCondition::RotationFailed, AlertSeverity::Info)
                };
                self.raise_alert(
                    tenant_id,
                    platform,
                    condition,
                    severity,
                    format!("credential rotation for {} failed: {}", platform, detail),
                )
                .await?;
                warn!(
                    tenant_id = %tenant_id,
                    platform = %platform,
                    failures = failures,
                    exhausted = exhausted,
                    "credential rotation failed"
                );
                Ok(())
            }
        }
    }

    /// Rotation history, newest first
    pub async fn rotation_history(
        &self,
        tenant_id: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<RotationEntry>> {
        self.repo.rotation_history(tenant_id, platform).await
    }

    /// Unacknowledged alerts for a tenant, newest first
    pub async fn pending_alerts(&self, tenant_id: &str) -> Result<Vec<TokenAlert>> {
        self.repo.pending_alerts(tenant_id).await
    }

    /// Operator acknowledgement of one alert
    pub async fn acknowledge_alert(&self, id: &str) -> Result<bool> {
        self.repo.acknowledge_alert(id).await
    }

    /// Operator acknowledgement of every pending alert for a tenant
    pub async fn acknowledge_all_alerts(
        &self,
        tenant_id: &str,
        platform: Option<Platform>,
    ) -> Result<u64> {
        self.repo.acknowledge_all(tenant_id, platform).await
    }

    fn should_rotate(&self, record: &TokenRecord, now: i64) -> bool {
        !record.needs_reauth
            && record.refresh.is_some()
            && record.expires_at <= now + self.config.refresh_lead_ms
    }

    async fn append_history(
        &self,
        tenant_id: &str,
        platform: Platform,
        now: i64,
        outcome: RotationOutcome,
        detail: Option<String>,
    ) -> Result<()> {
        self.repo
            .append_rotation(&RotationEntry {
                id: self.id_provider.generate_id(),
                tenant_id: tenant_id.to_string(),
                platform,
                rotated_at: now,
                outcome,
                detail,
            })
            .await
    }

    /// Create an alert unless the same unresolved condition already alerted
    /// within the cooldown window
    async fn raise_alert(
        &self,
        tenant_id: &str,
        platform: Platform,
        condition: AlertCondition,
        severity: AlertSeverity,
        message: String,
    ) -> Result<()> {
        let now = self.time_provider.now_millis();
        let since = now - self.config.alert_cooldown_ms;
        if self
            .repo
            .find_unacknowledged_alert(tenant_id, platform, condition, since)
            .await?
            .is_some()
        {
            debug!(
                tenant_id = %tenant_id,
                platform = %platform,
                condition = %condition,
                "duplicate alert suppressed"
            );
            return Ok(());
        }

        let alert = TokenAlert {
            id: self.id_provider.generate_id(),
            tenant_id: tenant_id.to_string(),
            platform,
            condition,
            severity,
            message,
            acknowledged: false,
            created_at: now,
        };
        self.repo.insert_alert(&alert).await?;
        warn!(
            tenant_id = %tenant_id,
            platform = %platform,
            condition = %condition,
            severity = %severity,
            "token alert raised"
        );
        self.notifier
            .notify(Notification::TokenAlertRaised {
                alert_id: alert.id,
                tenant_id: tenant_id.to_string(),
                platform,
                condition,
                severity,
                message: alert.message,
            })
            .await;
        Ok(())
    }
}
