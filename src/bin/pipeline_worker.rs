//! # Pipeline Worker
//!
//! Long-running consumer of the task queue, plus small operator commands.
//!
//! ## Usage
//!
//! ```bash
//! # Consume tasks until Ctrl+C
//! PIPELINE_ENV=production pipeline-worker run
//!
//! # Queue an existing task document
//! pipeline-worker enqueue 6f1c2d7e-0d7b-4a53-9d1e-2f4b8c1a9e10
//!
//! # Validate and print the effective configuration
//! pipeline-worker check-config
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use pipeline_core::config::ConfigManager;
use pipeline_core::database::{DatabaseConnection, DatabaseMigrations};
use pipeline_core::handlers::{HandlerRegistry, HandlerServices};
use pipeline_core::logging::init_structured_logging;
use pipeline_core::messaging::{connect_with_retry, PgmqWorkQueue, QueueConsumer, WorkQueue};
use pipeline_core::orchestration::TaskOrchestrator;
use pipeline_core::providers::{INaturalistClient, OpenElevationClient};
use pipeline_core::repository::PgTaskRepository;
use pipeline_core::store::PgRecordStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pipeline-worker")]
#[command(about = "Run dataset pipeline tasks from the work queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment to load (development, test, production)
    #[arg(short, long, env = "PIPELINE_ENV")]
    environment: Option<String>,

    /// Configuration directory (default: nearest `config/` holding pipeline.yaml)
    #[arg(short, long, env = "PIPELINE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the work queue until interrupted
    Run,

    /// Publish a task id to the work queue
    Enqueue {
        /// Id of a task document that already exists
        task_id: Uuid,
    },

    /// Load, validate and print the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let environment = cli
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    if let Some(dir) = &cli.config_dir {
        ConfigManager::require_directory(dir).context("Invalid --config-dir")?;
    }
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            Ok(())
        }
        Commands::Enqueue { task_id } => enqueue(&manager, task_id).await,
        Commands::Run => run(&manager).await,
    }
}

async fn enqueue(manager: &ConfigManager, task_id: Uuid) -> anyhow::Result<()> {
    let config = manager.config();
    init_structured_logging(&config.logging, manager.environment());

    let queue = PgmqWorkQueue::new(&config.database.url).await?;
    queue.ensure_queue(&config.queue.name).await?;
    let msg_id = queue
        .publish(&config.queue.name, &serde_json::json!(task_id.to_string()))
        .await?;

    info!(task_id = %task_id, msg_id = msg_id, queue = %config.queue.name, "Task enqueued");
    Ok(())
}

async fn run(manager: &ConfigManager) -> anyhow::Result<()> {
    let config = manager.config();
    init_structured_logging(&config.logging, manager.environment());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = manager.environment(),
        "Starting pipeline worker"
    );

    let database = connect_with_retry(
        config.queue.connect_attempts,
        config.queue.connect_backoff(),
        || async move { Ok(DatabaseConnection::new(&config.database).await?) },
    )
    .await
    .context("Database unavailable")?;
    if !database.health_check().await.unwrap_or(false) {
        anyhow::bail!("Database health check failed");
    }
    DatabaseMigrations::run_all(database.pool())
        .await
        .context("Migrations failed")?;

    let pool = database.pool().clone();
    let queue = PgmqWorkQueue::new_with_pool(pool.clone()).await;
    queue.ensure_queue(&config.queue.name).await?;

    let services = HandlerServices::new(
        config,
        Arc::new(PgTaskRepository::new(pool.clone())),
        Arc::new(PgRecordStore::new(pool)),
        Arc::new(INaturalistClient::new(&config.providers)?),
        Arc::new(OpenElevationClient::new(&config.providers)?),
    );
    let orchestrator = Arc::new(TaskOrchestrator::new(
        Arc::new(services),
        HandlerRegistry::new(),
    ));
    let consumer = QueueConsumer::new(Arc::new(queue), orchestrator, config.queue.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    info!("Press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("Shutdown signal received, finishing current task");

    // the consumer only checks the flag between tasks
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!(error = %e, "Consumer task ended abnormally");
    }
    database.close().await;

    info!("Pipeline worker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
