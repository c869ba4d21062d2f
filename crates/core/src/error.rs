// Application error type shared by every workspace crate.
//
// Infra adapters translate their native errors into these variants at the
// boundary (sqlx errors become `Database` strings in infra-sqlite); the
// application services only ever see this taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Rejected input or state raised below the application layer
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a guarded write or a single-flight race; the caller gives up
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
