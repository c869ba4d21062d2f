// SQLite Maintenance Implementation
// Reclaims terminal messages/jobs past the audit retention window.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use streamgate_core::error::Result;
use streamgate_core::port::{Maintenance, MaintenanceStats, TimeProvider};

use crate::map_sqlx_error;

pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    async fn db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(page_count * page_size)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        let before = self.db_size_bytes().await?;
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let after = self.db_size_bytes().await?;
        Ok((before - after) as f64 / (1024.0 * 1024.0))
    }

    async fn gc_terminal_messages(&self, retention_hours: i64) -> Result<i64> {
        let cutoff = self.time_provider.now_millis() - retention_hours * 60 * 60 * 1_000;
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE status IN ('SENT', 'FAILED', 'CANCELLED')
              AND finished_at IS NOT NULL AND finished_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() as i64)
    }

    async fn gc_terminal_jobs(&self, retention_hours: i64) -> Result<i64> {
        let cutoff = self.time_provider.now_millis() - retention_hours * 60 * 60 * 1_000;
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')
              AND finished_at IS NOT NULL AND finished_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() as i64)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.db_size_bytes().await?;
        let message_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let terminal_message_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE status IN ('SENT', 'FAILED', 'CANCELLED')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let terminal_job_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(MaintenanceStats {
            db_size_mb: db_size_bytes as f64 / (1024.0 * 1024.0),
            db_size_bytes,
            message_count,
            terminal_message_count,
            job_count,
            terminal_job_count,
        })
    }
}
