// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_executor;
pub mod job_repository;
pub mod maintenance;
pub mod message_repository;
pub mod notifier;
pub mod platform_sender;
pub mod time_provider;
pub mod token_refresher;
pub mod token_repository;

// Re-exports
pub use id_provider::IdProvider;
pub use job_executor::JobExecutor;
pub use job_repository::JobRepository;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use message_repository::MessageRepository;
pub use notifier::{Notification, Notifier};
pub use platform_sender::{PlatformSender, SendError};
pub use time_provider::TimeProvider;
pub use token_refresher::{RefreshError, RefreshedCredential, TokenRefresher};
pub use token_repository::TokenRepository;
