// Store Maintenance Port
// Terminal messages/jobs are kept for an audit retention window, then
// reclaimed here.

use crate::error::Result;
use async_trait::async_trait;

/// Store maintenance statistics
#[derive(Debug, Clone)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub message_count: i64,
    pub terminal_message_count: i64,
    pub job_count: i64,
    pub terminal_job_count: i64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Retention for terminal (sent/failed/cancelled) messages
    pub message_retention_hours: i64,

    /// Retention for terminal (completed/failed/cancelled) one-shot jobs
    pub job_retention_hours: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            message_retention_hours: 72,
            job_retention_hours: 72,
            max_db_size_mb: 500.0,
        }
    }
}

/// Store maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete terminal messages past retention. Returns rows deleted.
    async fn gc_terminal_messages(&self, retention_hours: i64) -> Result<i64>;

    /// Delete terminal jobs past retention. Returns rows deleted.
    async fn gc_terminal_jobs(&self, retention_hours: i64) -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (GC + conditional VACUUM)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let stats_before = self.get_stats().await?;

        let deleted_messages = self
            .gc_terminal_messages(config.message_retention_hours)
            .await?;
        let deleted_jobs = self.gc_terminal_jobs(config.job_retention_hours).await?;

        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats_after = self.get_stats().await?;

        tracing::info!(
            deleted_messages = deleted_messages,
            deleted_jobs = deleted_jobs,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}
