// Token Repository Port (Interface)
//
// Credential writes are version-guarded (compare-and-swap) so two concurrent
// rotations can never interleave a lost update; rotation history is
// append-only; alerts are acknowledged, never deleted.

use async_trait::async_trait;

use crate::domain::{
    AccessCredential, AlertCondition, Platform, RotationEntry, TokenAlert, TokenRecord,
};
use crate::error::Result;

/// Repository interface for TokenRecord / RotationEntry / TokenAlert
/// persistence
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert or replace the credential record for (tenant, platform); used
    /// on first issuance and after an operator re-authorizes
    async fn upsert(&self, record: &TokenRecord) -> Result<()>;

    async fn find(&self, tenant_id: &str, platform: Platform) -> Result<Option<TokenRecord>>;

    async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<TokenRecord>>;

    /// Records expiring at or before `before`, excluding those already
    /// flagged needs_reauth (sweep input)
    async fn find_expiring(&self, before: i64) -> Result<Vec<TokenRecord>>;

    /// Rotation success: swap in new credentials, clear failure counters.
    /// Guarded on `expected_version`; returns false on a lost race.
    #[allow(clippy::too_many_arguments)]
    async fn update_credentials(
        &self,
        tenant_id: &str,
        platform: Platform,
        expected_version: i64,
        access: &AccessCredential,
        refresh: Option<&AccessCredential>,
        expires_at: i64,
        now: i64,
    ) -> Result<bool>;

    /// Rotation failure: bump refresh_failures and optionally flag
    /// needs_reauth. Guarded on `expected_version`; returns false on a lost
    /// race.
    async fn record_refresh_failure(
        &self,
        tenant_id: &str,
        platform: Platform,
        expected_version: i64,
        needs_reauth: bool,
        now: i64,
    ) -> Result<bool>;

    /// Append a rotation history entry
    async fn append_rotation(&self, entry: &RotationEntry) -> Result<()>;

    /// Rotation history, newest first, optionally scoped to one platform
    async fn rotation_history(
        &self,
        tenant_id: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<RotationEntry>>;

    /// Insert a new alert
    async fn insert_alert(&self, alert: &TokenAlert) -> Result<()>;

    /// Most recent unacknowledged alert for the dedup key created at or after
    /// `since`
    async fn find_unacknowledged_alert(
        &self,
        tenant_id: &str,
        platform: Platform,
        condition: AlertCondition,
        since: i64,
    ) -> Result<Option<TokenAlert>>;

    /// Unacknowledged alerts for a tenant, newest first
    async fn pending_alerts(&self, tenant_id: &str) -> Result<Vec<TokenAlert>>;

    /// Acknowledge one alert. Returns false if unknown or already
    /// acknowledged.
    async fn acknowledge_alert(&self, id: &str) -> Result<bool>;

    /// Acknowledge all pending alerts for a tenant (optionally one platform).
    /// Returns the number acknowledged.
    async fn acknowledge_all(&self, tenant_id: &str, platform: Option<Platform>) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::TenantId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository with the same CAS semantics as the SQLite adapter
    pub struct InMemoryTokenRepository {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        records: HashMap<(TenantId, Platform), TokenRecord>,
        history: Vec<RotationEntry>,
        alerts: Vec<TokenAlert>,
    }

    impl InMemoryTokenRepository {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner::default()),
            }
        }

        pub fn get(&self, tenant_id: &str, platform: Platform) -> Option<TokenRecord> {
            self.inner
                .lock()
                .unwrap()
                .records
                .get(&(tenant_id.to_string(), platform))
                .cloned()
        }

        pub fn alerts(&self) -> Vec<TokenAlert> {
            self.inner.lock().unwrap().alerts.clone()
        }
    }

    impl Default for InMemoryTokenRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TokenRepository for InMemoryTokenRepository {
        async fn upsert(&self, record: &TokenRecord) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner
                .records
                .insert((record.tenant_id.clone(), record.platform), record.clone());
            Ok(())
        }

        async fn find(&self, tenant_id: &str, platform: Platform) -> Result<Option<TokenRecord>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .records
                .get(&(tenant_id.to_string(), platform))
                .cloned())
        }

        async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<TokenRecord>> {
            let inner = self.inner.lock().unwrap();
            let mut records: Vec<TokenRecord> = inner
                .records
                .values()
                .filter(|r| r.tenant_id == tenant_id)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.platform.as_str());
            Ok(records)
        }

        async fn find_expiring(&self, before: i64) -> Result<Vec<TokenRecord>> {
            let inner = self.inner.lock().unwrap();
            let mut records: Vec<TokenRecord> = inner
                .records
                .values()
                .filter(|r| !r.needs_reauth && r.expires_at <= before)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.expires_at);
            Ok(records)
        }

        async fn update_credentials(
            &self,
            tenant_id: &str,
            platform: Platform,
            expected_version: i64,
            access: &AccessCredential,
            refresh: Option<&AccessCredential>,
            expires_at: i64,
            now: i64,
        ) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.records.get_mut(&(tenant_id.to_string(), platform)) {
                Some(record) if record.version == expected_version => {
                    record.access = access.clone();
                    if let Some(refresh) = refresh {
                        record.refresh = Some(refresh.clone());
                    }
                    record.expires_at = expires_at;
                    record.needs_reauth = false;
                    record.refresh_failures = 0;
                    record.version += 1;
                    record.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn record_refresh_failure(
            &self,
            tenant_id: &str,
            platform: Platform,
            expected_version: i64,
            needs_reauth: bool,
            now: i64,
        ) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.records.get_mut(&(tenant_id.to_string(), platform)) {
                Some(record) if record.version == expected_version => {
                    record.refresh_failures += 1;
                    if needs_reauth {
                        record.needs_reauth = true;
                    }
                    record.version += 1;
                    record.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn append_rotation(&self, entry: &RotationEntry) -> Result<()> {
            self.inner.lock().unwrap().history.push(entry.clone());
            Ok(())
        }

        async fn rotation_history(
            &self,
            tenant_id: &str,
            platform: Option<Platform>,
        ) -> Result<Vec<RotationEntry>> {
            let inner = self.inner.lock().unwrap();
            let mut entries: Vec<RotationEntry> = inner
                .history
                .iter()
                .filter(|e| e.tenant_id == tenant_id)
                .filter(|e| platform.map_or(true, |p| e.platform == p))
                .cloned()
                .collect();
            entries.sort_by(|a, b| b.rotated_at.cmp(&a.rotated_at));
            Ok(entries)
        }

        async fn insert_alert(&self, alert: &TokenAlert) -> Result<()> {
            self.inner.lock().unwrap().alerts.push(alert.clone());
            Ok(())
        }

        async fn find_unacknowledged_alert(
            &self,
            tenant_id: &str,
            platform: Platform,
            condition: AlertCondition,
            since: i64,
        ) -> Result<Option<TokenAlert>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .alerts
                .iter()
                .filter(|a| {
                    !a.acknowledged
                        && a.tenant_id == tenant_id
                        && a.platform == platform
                        && a.condition == condition
                        && a.created_at >= since
                })
                .max_by_key(|a| a.created_at)
                .cloned())
        }

        async fn pending_alerts(&self, tenant_id: &str) -> Result<Vec<TokenAlert>> {
            let inner = self.inner.lock().unwrap();
            let mut alerts: Vec<TokenAlert> = inner
                .alerts
                .iter()
                .filter(|a| !a.acknowledged && a.tenant_id == tenant_id)
                .cloned()
                .collect();
            alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(alerts)
        }

        async fn acknowledge_alert(&self, id: &str) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner
                .alerts
                .iter_mut()
                .find(|a| a.id == id && !a.acknowledged)
            {
                Some(alert) => {
                    alert.acknowledged = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn acknowledge_all(
            &self,
            tenant_id: &str,
            platform: Option<Platform>,
        ) -> Result<u64> {
            let mut inner = self.inner.lock().unwrap();
            let mut count = 0;
            for alert in inner.alerts.iter_mut() {
                if !alert.acknowledged
                    && alert.tenant_id == tenant_id
                    && platform.map_or(true, |p| alert.platform == p)
                {
                    alert.acknowledged = true;
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}
