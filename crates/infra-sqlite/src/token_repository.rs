// SQLite TokenRepository Implementation
//
// Credential updates are version-guarded; the version column bumps on every
// write so a rotation that raced a concurrent change simply loses its guard.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use streamgate_core::domain::{
    AccessCredential, AlertCondition, Platform, RotationEntry, RotationOutcome, TokenAlert,
    TokenRecord,
};
use streamgate_core::error::{AppError, Result};
use streamgate_core::port::TokenRepository;

use crate::map_sqlx_error;

pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_platform(s: &str) -> Result<Platform> {
    s.parse()
        .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))
}

#[derive(FromRow)]
struct TokenRow {
    tenant_id: String,
    platform: String,
    access_credential: String,
    refresh_credential: Option<String>,
    expires_at: i64,
    needs_reauth: i64,
    refresh_failures: i32,
    version: i64,
    updated_at: i64,
}

impl TryFrom<TokenRow> for TokenRecord {
    type Error = AppError;

    fn try_from(row: TokenRow) -> Result<Self> {
        Ok(TokenRecord {
            tenant_id: row.tenant_id,
            platform: parse_platform(&row.platform)?,
            access: AccessCredential::new(row.access_credential),
            refresh: row.refresh_credential.map(AccessCredential::new),
            expires_at: row.expires_at,
            needs_reauth: row.needs_reauth != 0,
            refresh_failures: row.refresh_failures,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RotationRow {
    id: String,
    tenant_id: String,
    platform: String,
    rotated_at: i64,
    outcome: String,
    detail: Option<String>,
}

impl TryFrom<RotationRow> for RotationEntry {
    type Error = AppError;

    fn try_from(row: RotationRow) -> Result<Self> {
        let outcome: RotationOutcome = row
            .outcome
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;
        Ok(RotationEntry {
            id: row.id,
            tenant_id: row.tenant_id,
            platform: parse_platform(&row.platform)?,
            rotated_at: row.rotated_at,
            outcome,
            detail: row.detail,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: String,
    tenant_id: String,
    platform: String,
    condition: String,
    severity: String,
    message: String,
    acknowledged: i64,
    created_at: i64,
}

impl TryFrom<AlertRow> for TokenAlert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> Result<Self> {
        let condition = row
            .condition
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;
        let severity = row
            .severity
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;
        Ok(TokenAlert {
            id: row.id,
            tenant_id: row.tenant_id,
            platform: parse_platform(&row.platform)?,
            condition,
            severity,
            message: row.message,
            acknowledged: row.acknowledged != 0,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn upsert(&self, record: &TokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                tenant_id, platform, access_credential, refresh_credential,
                expires_at, needs_reauth, refresh_failures, version, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, platform) DO UPDATE SET
                access_credential = excluded.access_credential,
                refresh_credential = excluded.refresh_credential,
                expires_at = excluded.expires_at,
                needs_reauth = excluded.needs_reauth,
                refresh_failures = excluded.refresh_failures,
                version = tokens.version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.tenant_id)
        .bind(record.platform.as_str())
        .bind(record.access.expose())
        .bind(record.refresh.as_ref().map(|c| c.expose().to_string()))
        .bind(record.expires_at)
        .bind(record.needs_reauth as i64)
        .bind(record.refresh_failures)
        .bind(record.version)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find(&self, tenant_id: &str, platform: Platform) -> Result<Option<TokenRecord>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM tokens WHERE tenant_id = ? AND platform = ?",
        )
        .bind(tenant_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TokenRecord::try_from).transpose()
    }

    async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<TokenRecord>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM tokens WHERE tenant_id = ? ORDER BY platform",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TokenRecord::try_from).collect()
    }

    async fn find_expiring(&self, before: i64) -> Result<Vec<TokenRecord>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT * FROM tokens
            WHERE needs_reauth = 0 AND expires_at <= ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TokenRecord::try_from).collect()
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
        let result = sqlx::query(
            r#"
            UPDATE tokens SET
                access_credential = ?,
                refresh_credential = COALESCE(?, refresh_credential),
                expires_at = ?,
                needs_reauth = 0,
                refresh_failures = 0,
                version = version + 1,
                updated_at = ?
            WHERE tenant_id = ? AND platform = ? AND version = ?
            "#,
        )
        .bind(access.expose())
        .bind(refresh.map(|c| c.expose().to_string()))
        .bind(expires_at)
        .bind(now)
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_refresh_failure(
        &self,
        tenant_id: &str,
        platform: Platform,
        expected_version: i64,
        needs_reauth: bool,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tokens SET
                refresh_failures = refresh_failures + 1,
                needs_reauth = CASE WHEN ? THEN 1 ELSE needs_reauth END,
                version = version + 1,
                updated_at = ?
            WHERE tenant_id = ? AND platform = ? AND version = ?
            "#,
        )
        .bind(needs_reauth)
        .bind(now)
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_rotation(&self, entry: &RotationEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rotation_history (id, tenant_id, platform, rotated_at, outcome, detail)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(entry.platform.as_str())
        .bind(entry.rotated_at)
        .bind(entry.outcome.to_string())
        .bind(&entry.detail)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn rotation_history(
        &self,
        tenant_id: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<RotationEntry>> {
        let rows = sqlx::query_as::<_, RotationRow>(
            r#"
            SELECT * FROM rotation_history
            WHERE tenant_id = ? AND (? IS NULL OR platform = ?)
            ORDER BY rotated_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(platform.map(|p| p.as_str()))
        .bind(platform.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(RotationEntry::try_from).collect()
    }

    async fn insert_alert(&self, alert: &TokenAlert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_alerts (
                id, tenant_id, platform, condition, severity,
                message, acknowledged, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.tenant_id)
        .bind(alert.platform.as_str())
        .bind(alert.condition.to_string())
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(alert.acknowledged as i64)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_unacknowledged_alert(
        &self,
        tenant_id: &str,
        platform: Platform,
        condition: AlertCondition,
        since: i64,
    ) -> Result<Option<TokenAlert>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM token_alerts
            WHERE tenant_id = ? AND platform = ? AND condition = ?
              AND acknowledged = 0 AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(condition.to_string())
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TokenAlert::try_from).transpose()
    }

    async fn pending_alerts(&self, tenant_id: &str) -> Result<Vec<TokenAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM token_alerts
            WHERE tenant_id = ? AND acknowledged = 0
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TokenAlert::try_from).collect()
    }

    async fn acknowledge_alert(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE token_alerts SET acknowledged = 1 WHERE id = ? AND acknowledged = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn acknowledge_all(&self, tenant_id: &str, platform: Option<Platform>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE token_alerts SET acknowledged = 1
            WHERE tenant_id = ? AND acknowledged = 0 AND (? IS NULL OR platform = ?)
            "#,
        )
        .bind(tenant_id)
        .bind(platform.map(|p| p.as_str()))
        .bind(platform.map(|p| p.as_str()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
