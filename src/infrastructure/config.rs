//! Application configuration

use std::env;

use anyhow::{Context, Result};

use crate::application::services::DeleteConfig;
use crate::domain::value_objects::UserId;

/// Store backend selection
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// "memory" or "sqlite"
    pub backend: String,
    /// SQLite database path (sqlite backend only)
    pub sqlite_path: String,
}

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,

    /// The single-tenant deployment's user; owns every world.
    pub owner_id: UserId,

    /// Number of delete workers to run
    pub worker_count: usize,
    /// How long a worker waits for a wake-up before re-polling the queue
    pub worker_recovery_interval_secs: u64,
    /// Interval between TTL/dead-job maintenance sweeps
    pub maintenance_interval_secs: u64,
    /// Deliveries a delete job gets before it is parked as dead
    pub job_max_attempts: u32,

    /// Cascade-delete tuning consumed by the orchestrator
    pub delete: DeleteConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            store: StoreConfig {
                backend: env::var("LOREVAULT_STORE_BACKEND")
                    .unwrap_or_else(|_| "sqlite".to_string()),
                sqlite_path: env::var("LOREVAULT_SQLITE_PATH")
                    .unwrap_or_else(|_| "data/lorevault.db".to_string()),
            },

            owner_id: env::var("LOREVAULT_OWNER_ID")
                .context("LOREVAULT_OWNER_ID environment variable is required")?
                .parse()
                .context("LOREVAULT_OWNER_ID must be a valid UUID")?,

            worker_count: env::var("LOREVAULT_WORKER_COUNT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("LOREVAULT_WORKER_COUNT must be a positive integer")?,
            worker_recovery_interval_secs: env::var("LOREVAULT_WORKER_RECOVERY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("LOREVAULT_WORKER_RECOVERY_SECS must be a number of seconds")?,
            maintenance_interval_secs: env::var("LOREVAULT_MAINTENANCE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("LOREVAULT_MAINTENANCE_INTERVAL_SECS must be a number of seconds")?,
            job_max_attempts: env::var("LOREVAULT_JOB_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("LOREVAULT_JOB_MAX_ATTEMPTS must be a positive integer")?,

            delete: DeleteConfig {
                max_concurrent_per_user_per_world: env::var("LOREVAULT_MAX_ACTIVE_DELETES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("LOREVAULT_MAX_ACTIVE_DELETES must be a positive integer")?,
                max_batch_size: env::var("LOREVAULT_DELETE_BATCH_SIZE")
                    .unwrap_or_else(|_| "25".to_string())
                    .parse()
                    .context("LOREVAULT_DELETE_BATCH_SIZE must be a positive integer")?,
                rate_limit_per_second: env::var("LOREVAULT_DELETE_RATE_LIMIT")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .context("LOREVAULT_DELETE_RATE_LIMIT must be a number (0 disables)")?,
                operation_ttl_seconds: env::var("LOREVAULT_OPERATION_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()
                    .context("LOREVAULT_OPERATION_TTL_SECS must be a number of seconds")?,
            },
        })
    }
}
