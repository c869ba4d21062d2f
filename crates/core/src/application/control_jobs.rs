// Control Job Executors
//
// Thin bridges from the scheduler's JobKind discriminators to the components
// that do the periodic work. Wired by the composition root.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::health::PlatformHealthMonitor;
use crate::application::outbox::MessageOutbox;
use crate::application::tokens::TokenLifecycleManager;
use crate::domain::{Job, JobKind};
use crate::error::Result;
use crate::port::{JobExecutor, Maintenance, MaintenanceConfig};

/// Drains due messages through the platform senders
pub struct OutboxFlushExecutor {
    outbox: Arc<MessageOutbox>,
}

impl OutboxFlushExecutor {
    pub fn new(outbox: Arc<MessageOutbox>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl JobExecutor for OutboxFlushExecutor {
    async fn execute(&self, _job: &Job) -> Result<()> {
        let sent = self.outbox.flush().await?;
        if sent > 0 {
            debug!(sent = sent, "outbox flush delivered messages");
        }
        Ok(())
    }
}

/// Proactive token rotation pass
pub struct TokenSweepExecutor {
    tokens: Arc<TokenLifecycleManager>,
}

impl TokenSweepExecutor {
    pub fn new(tokens: Arc<TokenLifecycleManager>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl JobExecutor for TokenSweepExecutor {
    async fn execute(&self, _job: &Job) -> Result<()> {
        let rotated = self.tokens.sweep().await?;
        if rotated > 0 {
            info!(rotated = rotated, "token sweep rotated credentials");
        }
        Ok(())
    }
}

/// Periodic platform-health visibility snapshot
pub struct HealthSweepExecutor {
    health: Arc<PlatformHealthMonitor>,
}

impl HealthSweepExecutor {
    pub fn new(health: Arc<PlatformHealthMonitor>) -> Self {
        Self { health }
    }
}

#[async_trait]
impl JobExecutor for HealthSweepExecutor {
    async fn execute(&self, _job: &Job) -> Result<()> {
        for health in self.health.all_platform_health() {
            info!(
                platform = %health.platform,
                circuit = %health.circuit,
                consecutive_failures = health.consecutive_failures,
                trip_count = health.trip_count,
                throttle_until = ?health.throttle_until,
                "platform health"
            );
        }
        Ok(())
    }
}

/// Reclaims terminal rows past the audit retention window
pub struct PurgeTerminalExecutor {
    maintenance: Arc<dyn Maintenance>,
}

impl PurgeTerminalExecutor {
    pub fn new(maintenance: Arc<dyn Maintenance>) -> Self {
        Self { maintenance }
    }
}

#[async_trait]
impl JobExecutor for PurgeTerminalExecutor {
    async fn execute(&self, job: &Job) -> Result<()> {
        let config = match job.kind {
            JobKind::PurgeTerminal { retention_hours } => MaintenanceConfig {
                message_retention_hours: retention_hours,
                job_retention_hours: retention_hours,
                ..Default::default()
            },
            _ => MaintenanceConfig::default(),
        };
        self.maintenance.run_full_maintenance(&config).await?;
        Ok(())
    }
}
