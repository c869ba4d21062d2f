//! JSON-RPC API Layer
//!
//! Exposes the resilience-layer operations (outbox, jobs, platform health,
//! token lifecycle) to dashboards and bot business logic over JSON-RPC 2.0.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
