//! lorevault worker daemon
//!
//! Runs the cascade-delete engine against the configured store:
//! - Claims delete jobs from the queue and processes their operations
//! - Sweeps expired operation records and dead jobs
//! - Shuts down on ctrl-c; in-flight progress is durable and resumes on the
//!   next start

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lorevault::infrastructure::config::AppConfig;
use lorevault::infrastructure::delete_worker::{delete_operation_worker, maintenance_worker};
use lorevault::infrastructure::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lorevault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting lorevault");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Store backend: {}", config.store.backend);
    tracing::info!("  Delete workers: {}", config.worker_count);
    tracing::info!(
        "  Delete batch size: {} ({}/s)",
        config.delete.max_batch_size,
        config.delete.rate_limit_per_second
    );

    // Initialize application state
    let state = AppState::new(config).await?;
    let state = Arc::new(state);
    tracing::info!("Application state initialized");

    // Start delete workers
    let recovery_interval = Duration::from_secs(state.config.worker_recovery_interval_secs);
    let mut workers = Vec::new();
    for _ in 0..state.config.worker_count.max(1) {
        let service = state.cascade_delete_service.clone();
        let queue = state.job_queue.clone();
        workers.push(tokio::spawn(async move {
            delete_operation_worker(service, queue, recovery_interval).await;
        }));
    }

    // Start the maintenance sweep
    let maintenance = {
        let operations = state.operation_store.clone();
        let queue = state.job_queue.clone();
        let interval = Duration::from_secs(state.config.maintenance_interval_secs);
        tokio::spawn(async move {
            maintenance_worker(operations, queue, interval).await;
        })
    };

    tracing::info!("lorevault is running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for worker in workers {
        worker.abort();
    }
    maintenance.abort();

    Ok(())
}
