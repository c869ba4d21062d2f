//! RPC Request/Response Types

use serde::{Deserialize, Serialize};

use streamgate_core::application::tokens::{TokenDashboard, TokenExpirySummary};
use streamgate_core::domain::{
    CircuitState, Job, JobKind, JobStatus, MessagePayload, MessagePriority, Platform,
    PlatformHealth, QueueStats, TokenAlert,
};

// ---------------------------------------------------------------------------
// outbox.*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueMessageRequest {
    pub tenant_id: String,
    pub platform: Platform,
    pub payload: MessagePayload,
    #[serde(default)]
    pub priority: Option<MessagePriority>,
    #[serde(default)]
    pub scheduled_for: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueMessageResponse {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct QueueStatsRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsResponse {
    pub stats: QueueStats,
}

// ---------------------------------------------------------------------------
// jobs.*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: JobKind,
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub run_at: Option<i64>,
    #[serde(default)]
    pub repeat_interval_ms: Option<i64>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Job projection without internal payload details
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub next_run: i64,
    pub repeat_interval_ms: Option<i64>,
    pub last_run: Option<i64>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.discriminator().to_string(),
            name: job.name,
            status: job.status,
            priority: job.priority,
            next_run: job.next_run,
            repeat_interval_ms: job.repeat_interval_ms,
            last_run: job.last_run,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub jobs: Vec<JobView>,
}

// ---------------------------------------------------------------------------
// platform.*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PlatformHealthRequest {
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformHealthView {
    pub platform: Platform,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub open_until: Option<i64>,
    pub throttle_until: Option<i64>,
    pub trip_count: u32,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
}

impl From<PlatformHealth> for PlatformHealthView {
    fn from(health: PlatformHealth) -> Self {
        Self {
            platform: health.platform,
            circuit: health.circuit,
            consecutive_failures: health.consecutive_failures,
            open_until: health.open_until,
            throttle_until: health.throttle_until,
            trip_count: health.trip_count,
            last_success_at: health.last_success_at,
            last_failure_at: health.last_failure_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformHealthResponse {
    pub platforms: Vec<PlatformHealthView>,
}

// ---------------------------------------------------------------------------
// tokens.*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenDashboardRequest {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenDashboardResponse {
    pub dashboard: TokenDashboard,
}

#[derive(Debug, Deserialize)]
pub struct TokenCheckRequest {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenCheckResponse {
    pub summary: TokenExpirySummary,
}

#[derive(Debug, Deserialize)]
pub struct PendingAlertsRequest {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingAlertsResponse {
    pub alerts: Vec<TokenAlert>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeAlertRequest {
    #[serde(default)]
    pub alert_id: Option<String>,
    /// Set together with an optional platform to acknowledge in bulk
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcknowledgeAlertResponse {
    pub acknowledged: u64,
}
