// Job Domain Model
//
// Jobs drive the periodic control work (outbox flushing, token sweeps, health
// sweeps, store maintenance). Recurring jobs reschedule after BOTH outcomes so
// an isolated failure never kills a periodic sweep.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Job ID (UUID v4)
pub type JobId = String;

/// Job kind, keyed by an explicit type discriminator.
///
/// The discriminator is persisted as the `job_type` column; the full variant
/// (including any parameters) is persisted as the JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Drain due messages through the platform senders
    OutboxFlush,
    /// Proactive credential rotation pass over all tenants
    TokenSweep,
    /// Periodic platform-health visibility snapshot
    HealthSweep,
    /// Reclaim terminal messages/jobs past the audit retention window
    PurgeTerminal { retention_hours: i64 },
}

impl JobKind {
    /// Stable discriminator, persisted as the `job_type` column
    pub fn discriminator(&self) -> &'static str {
        match self {
            JobKind::OutboxFlush => "outbox_flush",
            JobKind::TokenSweep => "token_sweep",
            JobKind::HealthSweep => "health_sweep",
            JobKind::PurgeTerminal { .. } => "purge_terminal",
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "invalid job status: {}",
                other
            ))),
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub status: JobStatus,
    /// Higher runs first among equally-due jobs
    pub priority: i32,
    /// Requested first execution time (epoch ms)
    pub run_at: i64,
    /// When set, the job reschedules to now + interval after every outcome
    pub repeat_interval_ms: Option<i64>,
    pub last_run: Option<i64>,
    /// Next execution time while pending (epoch ms); never before created_at
    pub next_run: i64,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: i64,
    pub last_error: Option<String>,
    pub finished_at: Option<i64>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        kind: JobKind,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            status: JobStatus::Pending,
            priority: 0,
            run_at: created_at,
            repeat_interval_ms: None,
            last_run: None,
            next_run: created_at,
            attempts: 0,
            max_attempts: 3,
            created_at,
            last_error: None,
            finished_at: None,
        }
    }

    /// Set the first execution time, clamped so next_run never precedes
    /// creation
    pub fn with_run_at(mut self, run_at: i64) -> Self {
        self.run_at = run_at;
        self.next_run = run_at.max(self.created_at);
        self
    }

    pub fn with_repeat_interval(mut self, interval_ms: i64) -> Self {
        self.repeat_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval_ms.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults() {
        let job = Job::new("j-1", 1_000, JobKind::OutboxFlush, "outbox flush");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.next_run, 1_000);
        assert!(!job.is_recurring());
    }

    #[test]
    fn test_run_at_never_precedes_creation() {
        let job = Job::new("j-2", 5_000, JobKind::TokenSweep, "sweep").with_run_at(1_000);
        assert_eq!(job.next_run, 5_000);

        let future = Job::new("j-3", 5_000, JobKind::TokenSweep, "sweep").with_run_at(9_000);
        assert_eq!(future.next_run, 9_000);
    }

    #[test]
    fn test_kind_discriminator_matches_payload_tag() {
        let kind = JobKind::PurgeTerminal { retention_hours: 72 };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], kind.discriminator());
        assert_eq!(json["retention_hours"], 72);

        let back: JobKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
