//! Streamgate - Main Entry Point
//!
//! Composition root: wires the health monitor, outbox, scheduler and token
//! lifecycle manager against the SQLite store, registers the recurring
//! control jobs and serves the JSON-RPC surface.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamgate_api_rpc::{RpcServer, RpcServerConfig};
use streamgate_core::application::control_jobs::{
    HealthSweepExecutor, OutboxFlushExecutor, PurgeTerminalExecutor, TokenSweepExecutor,
};
use streamgate_core::application::{
    shutdown_channel, BackoffPolicy, HealthConfig, JobScheduler, MessageOutbox, OutboxConfig,
    PlatformHealthMonitor, SchedulerConfig, StartupRecovery, TokenConfig, TokenLifecycleManager,
};
use streamgate_core::domain::JobKind;
use streamgate_core::port::id_provider::UuidProvider;
use streamgate_core::port::notifier::LogNotifier;
use streamgate_core::port::time_provider::SystemTimeProvider;
use streamgate_core::port::{Notifier, PlatformSender, TimeProvider, TokenRefresher};
use streamgate_infra_sqlite::{
    create_pool, run_migrations, SqliteJobRepository, SqliteMaintenance, SqliteMessageRepository,
    SqliteTokenRepository,
};

mod senders;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.streamgate/streamgate.db";

const OUTBOX_FLUSH_INTERVAL_MS: i64 = 2_000;
const TOKEN_SWEEP_INTERVAL_MS: i64 = 5 * 60 * 1_000;
const HEALTH_SWEEP_INTERVAL_MS: i64 = 60 * 1_000;
const PURGE_INTERVAL_MS: i64 = 6 * 60 * 60 * 1_000;
const PURGE_RETENTION_HOURS: i64 = 72;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (json for production, pretty for development)
    let log_format = std::env::var("STREAMGATE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("streamgate=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Streamgate v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("STREAMGATE_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let rpc_port: u16 = std::env::var("STREAMGATE_RPC_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9631);

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let message_repo = Arc::new(SqliteMessageRepository::new(pool.clone()));
    let job_repo = Arc::new(SqliteJobRepository::new(pool.clone()));
    let token_repo = Arc::new(SqliteTokenRepository::new(pool.clone()));
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));

    // Platform adapters; real API clients are provided by the bot crates
    let platform_sender: Arc<dyn PlatformSender> = Arc::new(senders::UnconfiguredSender);
    let token_refresher: Arc<dyn TokenRefresher> = Arc::new(senders::UnconfiguredRefresher);

    let health = Arc::new(PlatformHealthMonitor::new(
        HealthConfig::default(),
        time_provider.clone(),
    ));

    let tokens = Arc::new(TokenLifecycleManager::new(
        token_repo,
        token_refresher,
        notifier.clone(),
        time_provider.clone(),
        id_provider.clone(),
        TokenConfig::default(),
    ));

    let outbox = Arc::new(MessageOutbox::new(
        message_repo,
        health.clone(),
        platform_sender,
        tokens.clone(),
        notifier.clone(),
        time_provider.clone(),
        id_provider.clone(),
        BackoffPolicy::default(),
        OutboxConfig::default(),
    ));

    let scheduler = Arc::new(JobScheduler::new(
        job_repo.clone(),
        notifier,
        time_provider.clone(),
        id_provider,
        BackoffPolicy::default(),
        SchedulerConfig::default(),
    ));

    scheduler.register_executor(
        "outbox_flush",
        Arc::new(OutboxFlushExecutor::new(outbox.clone())),
    );
    scheduler.register_executor(
        "token_sweep",
        Arc::new(TokenSweepExecutor::new(tokens.clone())),
    );
    scheduler.register_executor(
        "health_sweep",
        Arc::new(HealthSweepExecutor::new(health.clone())),
    );
    scheduler.register_executor(
        "purge_terminal",
        Arc::new(PurgeTerminalExecutor::new(maintenance)),
    );

    // 5. Startup recovery: requeue jobs orphaned by a previous process
    info!("Running startup recovery...");
    let recovery = StartupRecovery::new(job_repo, time_provider);
    match recovery.requeue_orphaned_jobs().await {
        Ok(count) => info!(requeued_jobs = count, "Startup recovery completed"),
        Err(e) => tracing::error!(error = ?e, "Startup recovery failed"),
    }

    // 6. Ensure the recurring control jobs exist (idempotent)
    scheduler
        .ensure_recurring(JobKind::OutboxFlush, "outbox flush", OUTBOX_FLUSH_INTERVAL_MS)
        .await
        .map_err(|e| anyhow::anyhow!("ensure outbox flush job: {}", e))?;
    scheduler
        .ensure_recurring(JobKind::TokenSweep, "token sweep", TOKEN_SWEEP_INTERVAL_MS)
        .await
        .map_err(|e| anyhow::anyhow!("ensure token sweep job: {}", e))?;
    scheduler
        .ensure_recurring(JobKind::HealthSweep, "health sweep", HEALTH_SWEEP_INTERVAL_MS)
        .await
        .map_err(|e| anyhow::anyhow!("ensure health sweep job: {}", e))?;
    scheduler
        .ensure_recurring(
            JobKind::PurgeTerminal {
                retention_hours: PURGE_RETENTION_HOURS,
            },
            "purge terminal rows",
            PURGE_INTERVAL_MS,
        )
        .await
        .map_err(|e| anyhow::anyhow!("ensure purge job: {}", e))?;

    // 7. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        port: rpc_port,
        ..Default::default()
    };
    let rpc_server = RpcServer::new(
        rpc_config,
        outbox,
        scheduler.clone(),
        health,
        tokens,
    );
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 8. Start the scheduler loop
    info!("Starting scheduler loop...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let loop_scheduler = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = loop_scheduler.run(shutdown_rx).await {
            tracing::error!(error = ?e, "Scheduler loop failed");
        }
    });

    info!("System ready. Waiting for work...");
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown: stop accepting ticks, drain the loop
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
