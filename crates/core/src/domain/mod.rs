// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod message;
pub mod platform;
pub mod token;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobKind, JobStatus};
pub use message::{
    MessageId, MessagePayload, MessagePriority, MessageStatus, PlatformDepth, QueueStats,
    QueuedMessage,
};
pub use platform::{CircuitState, Platform, PlatformHealth};
pub use token::{
    AccessCredential, AlertCondition, AlertSeverity, RotationEntry, RotationOutcome, TokenAlert,
    TokenHealth, TokenRecord,
};

/// Tenant identifier (one row of the multi-tenant stream bot)
pub type TenantId = String;
