//! RPC error mapping
//!
//! Collapses the application error taxonomy onto the JSON-RPC error codes
//! the dashboards key on: 4xxx for caller mistakes, 5xxx for server faults.

use jsonrpsee::types::ErrorObjectOwned;
use streamgate_core::error::AppError;

pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let (code, message) = match err {
        AppError::Validation(msg) => (code::VALIDATION_ERROR, msg),
        AppError::Domain(e) => (code::VALIDATION_ERROR, e.to_string()),
        AppError::Serialization(e) => (code::VALIDATION_ERROR, e.to_string()),
        AppError::NotFound(msg) => (code::NOT_FOUND, msg),
        AppError::Conflict(msg) => (code::CONFLICT, msg),
        AppError::InvalidState(msg) => (code::CONFLICT, msg),
        AppError::Database(msg) => (code::DB_ERROR, msg),
        other => (code::INTERNAL_ERROR, other.to_string()),
    };
    ErrorObjectOwned::owned(code, message, None::<()>)
}

/// Rate-limit rejection
pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}
