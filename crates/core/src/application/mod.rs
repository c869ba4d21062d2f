// Application Layer - Use Cases and Business Logic

pub mod backoff;
pub mod control_jobs;
pub mod health;
pub mod outbox;
pub mod recovery;
pub mod scheduler;
pub mod tokens;

// Re-exports
pub use backoff::BackoffPolicy;
pub use health::{FailureKind, HealthConfig, PlatformHealthMonitor};
pub use outbox::{MessageOutbox, OutboxConfig};
pub use recovery::StartupRecovery;
pub use scheduler::{
    shutdown_channel, CreateJobOptions, JobFilter, JobScheduler, SchedulerConfig, ShutdownSender,
    ShutdownToken,
};
pub use tokens::{TokenConfig, TokenExpirySummary, TokenLifecycleManager};
