//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use std::sync::Arc;

use jsonrpsee::types::ErrorObjectOwned;

use streamgate_core::application::{
    JobFilter, JobScheduler, MessageOutbox, PlatformHealthMonitor, TokenLifecycleManager,
};
use streamgate_core::application::scheduler::CreateJobOptions;
use streamgate_core::domain::{MessagePriority, PlatformHealth};
use streamgate_core::error::AppError;

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::*;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    outbox: Arc<MessageOutbox>,
    scheduler: Arc<JobScheduler>,
    health: Arc<PlatformHealthMonitor>,
    tokens: Arc<TokenLifecycleManager>,
    rate_limiter: RateLimiter,
}

impl RpcHandler {
    pub fn new(
        outbox: Arc<MessageOutbox>,
        scheduler: Arc<JobScheduler>,
        health: Arc<PlatformHealthMonitor>,
        tokens: Arc<TokenLifecycleManager>,
    ) -> Self {
        // Default: 200 burst, 100 req/sec (configurable via env)
        let max_burst: u32 = std::env::var("STREAMGATE_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        let rate_per_sec: u32 = std::env::var("STREAMGATE_RATE_LIMIT_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Self {
            outbox,
            scheduler,
            health,
            tokens,
            rate_limiter: RateLimiter::new(max_burst, rate_per_sec),
        }
    }

    /// outbox.enqueue.v1
    pub async fn enqueue_message(
        &self,
        params: EnqueueMessageRequest,
    ) -> Result<EnqueueMessageResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let message_id = self
            .outbox
            .enqueue(
                params.tenant_id,
                params.platform,
                params.payload,
                params.priority.unwrap_or(MessagePriority::Normal),
                params.scheduled_for,
            )
            .await
            .map_err(to_rpc_error)?;

        Ok(EnqueueMessageResponse {
            message_id,
            status: "PENDING".to_string(),
        })
    }

    /// outbox.stats.v1
    pub async fn queue_stats(
        &self,
        params: QueueStatsRequest,
    ) -> Result<QueueStatsResponse, ErrorObjectOwned> {
        let stats = self
            .outbox
            .queue_stats(params.tenant_id.as_deref())
            .await
            .map_err(to_rpc_error)?;
        Ok(QueueStatsResponse { stats })
    }

    /// jobs.create.v1
    pub async fn create_job(
        &self,
        params: CreateJobRequest,
    ) -> Result<CreateJobResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let job_id = self
            .scheduler
            .create_job(
                params.kind,
                params.name,
                CreateJobOptions {
                    priority: params.priority.unwrap_or(0),
                    run_at: params.run_at,
                    repeat_interval_ms: params.repeat_interval_ms,
                    max_attempts: params.max_attempts,
                },
            )
            .await
            .map_err(to_rpc_error)?;

        Ok(CreateJobResponse {
            job_id,
            status: "PENDING".to_string(),
        })
    }

    /// jobs.cancel.v1
    pub async fn cancel_job(
        &self,
        params: CancelJobRequest,
    ) -> Result<CancelJobResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let cancelled = self
            .scheduler
            .cancel_job(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(CancelJobResponse {
            job_id: params.job_id,
            cancelled,
        })
    }

    /// jobs.status.v1
    pub async fn job_status(
        &self,
        params: JobStatusRequest,
    ) -> Result<JobStatusResponse, ErrorObjectOwned> {
        let jobs = match params.job_id {
            Some(job_id) => {
                let job = self
                    .scheduler
                    .job_status(&job_id)
                    .await
                    .map_err(to_rpc_error)?
                    .ok_or_else(|| {
                        to_rpc_error(AppError::NotFound(format!("Job {} not found", job_id)))
                    })?;
                vec![job]
            }
            None => self
                .scheduler
                .jobs(JobFilter {
                    status: params.status,
                    kind: params.kind,
                    limit: params.limit,
                })
                .await
                .map_err(to_rpc_error)?,
        };

        Ok(JobStatusResponse {
            jobs: jobs.into_iter().map(JobView::from).collect(),
        })
    }

    /// platform.health.v1
    pub async fn platform_health(
        &self,
        params: PlatformHealthRequest,
    ) -> Result<PlatformHealthResponse, ErrorObjectOwned> {
        let platforms = match params.platform {
            Some(platform) => {
                // Never-seen platforms report as a fresh closed circuit
                let health = self
                    .health
                    .platform_health(platform)
                    .unwrap_or_else(|| PlatformHealth::new(platform));
                vec![health.into()]
            }
            None => self
                .health
                .all_platform_health()
                .into_iter()
                .map(PlatformHealthView::from)
                .collect(),
        };

        Ok(PlatformHealthResponse { platforms })
    }

    /// tokens.dashboard.v1
    pub async fn token_dashboard(
        &self,
        params: TokenDashboardRequest,
    ) -> Result<TokenDashboardResponse, ErrorObjectOwned> {
        let dashboard = self
            .tokens
            .token_dashboard(&params.tenant_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(TokenDashboardResponse { dashboard })
    }

    /// tokens.check.v1
    pub async fn check_token_expiry(
        &self,
        params: TokenCheckRequest,
    ) -> Result<TokenCheckResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let summary = self
            .tokens
            .check_token_expiry(&params.tenant_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(TokenCheckResponse { summary })
    }

    /// tokens.alerts.v1
    pub async fn pending_alerts(
        &self,
        params: PendingAlertsRequest,
    ) -> Result<PendingAlertsResponse, ErrorObjectOwned> {
        let alerts = self
            .tokens
            .pending_alerts(&params.tenant_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(PendingAlertsResponse { alerts })
    }

    /// tokens.ack.v1
    pub async fn acknowledge_alert(
        &self,
        params: AcknowledgeAlertRequest,
    ) -> Result<AcknowledgeAlertResponse, ErrorObjectOwned> {
        if !self.rate_limiter.check() {
            return Err(throttled());
        }

        let acknowledged = match (params.alert_id, params.tenant_id) {
            (Some(alert_id), _) => {
                let acked = self
                    .tokens
                    .acknowledge_alert(&alert_id)
                    .await
                    .map_err(to_rpc_error)?;
                u64::from(acked)
            }
            (None, Some(tenant_id)) => self
                .tokens
                .acknowledge_all_alerts(&tenant_id, params.platform)
                .await
                .map_err(to_rpc_error)?,
            (None, None) => {
                return Err(to_rpc_error(AppError::Validation(
                    "either alert_id or tenant_id is required".to_string(),
                )))
            }
        };

        Ok(AcknowledgeAlertResponse { acknowledged })
    }
}
