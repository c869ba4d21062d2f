//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over TCP on localhost; only binds 127.0.0.1 so the surface
//! stays machine-local.

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::sync::Arc;
use tracing::info;

use streamgate_core::application::{
    JobScheduler, MessageOutbox, PlatformHealthMonitor, TokenLifecycleManager,
};

use crate::handler::RpcHandler;
use crate::types::{
    AcknowledgeAlertRequest, CancelJobRequest, CreateJobRequest, EnqueueMessageRequest,
    JobStatusRequest, PendingAlertsRequest, PlatformHealthRequest, QueueStatsRequest,
    TokenCheckRequest, TokenDashboardRequest,
};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9631;

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

macro_rules! register {
    ($module:expr, $handler:expr, $method:literal, $request:ty, $call:ident) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($method, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $request = params.parse()?;
                    handler.$call(req).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        outbox: Arc<MessageOutbox>,
        scheduler: Arc<JobScheduler>,
        health: Arc<PlatformHealthMonitor>,
        tokens: Arc<TokenLifecycleManager>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(outbox, scheduler, health, tokens)),
        }
    }

    /// Start the JSON-RPC server
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP (localhost only)"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        register!(module, self.handler, "outbox.enqueue.v1", EnqueueMessageRequest, enqueue_message);
        register!(module, self.handler, "outbox.stats.v1", QueueStatsRequest, queue_stats);
        register!(module, self.handler, "jobs.create.v1", CreateJobRequest, create_job);
        register!(module, self.handler, "jobs.cancel.v1", CancelJobRequest, cancel_job);
        register!(module, self.handler, "jobs.status.v1", JobStatusRequest, job_status);
        register!(module, self.handler, "platform.health.v1", PlatformHealthRequest, platform_health);
        register!(module, self.handler, "tokens.dashboard.v1", TokenDashboardRequest, token_dashboard);
        register!(module, self.handler, "tokens.check.v1", TokenCheckRequest, check_token_expiry);
        register!(module, self.handler, "tokens.alerts.v1", PendingAlertsRequest, pending_alerts);
        register!(module, self.handler, "tokens.ack.v1", AcknowledgeAlertRequest, acknowledge_alert);

        info!("JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok(handle)
    }
}
