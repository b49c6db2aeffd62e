//! Store factory - Creates store and queue backends based on configuration
//!
//! Backends share one SQLite pool when the sqlite backend is selected; the
//! memory backends need no shared state. Adding a backend means adding a
//! match arm here, nothing upstream changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::application::ports::outbound::{
    DeleteJobQueuePort, DeleteOperationStorePort, EntityStorePort,
};
use crate::infrastructure::config::StoreConfig;
use crate::infrastructure::persistence::{
    InMemoryEntityStore, InMemoryOperationStore, SqliteEntityStore, SqliteOperationStore,
};
use crate::infrastructure::queues::{InMemoryDeleteJobQueue, SqliteDeleteJobQueue};

pub struct StoreFactory {
    config: StoreConfig,
    job_max_attempts: u32,
    sqlite_pool: Option<SqlitePool>,
}

impl StoreFactory {
    pub async fn new(config: StoreConfig, job_max_attempts: u32) -> Result<Self> {
        let sqlite_pool = if config.backend == "sqlite" {
            // Ensure data directory exists
            if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create store database directory")?;
            }

            let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite_path))
                .await
                .context("Failed to connect to SQLite store database")?;
            tracing::info!("Connected to SQLite store database: {}", config.sqlite_path);
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            config,
            job_max_attempts,
            sqlite_pool,
        })
    }

    pub async fn create_entity_store(&self) -> Result<Arc<dyn EntityStorePort>> {
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryEntityStore::new())),
            "sqlite" => {
                let pool = self.pool()?;
                let store = SqliteEntityStore::new(pool.clone())
                    .await
                    .context("Failed to initialize SQLite entity store")?;
                Ok(Arc::new(store))
            }
            backend => anyhow::bail!("Unsupported store backend: {}", backend),
        }
    }

    pub async fn create_operation_store(&self) -> Result<Arc<dyn DeleteOperationStorePort>> {
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryOperationStore::new())),
            "sqlite" => {
                let pool = self.pool()?;
                let store = SqliteOperationStore::new(pool.clone())
                    .await
                    .context("Failed to initialize SQLite operation store")?;
                Ok(Arc::new(store))
            }
            backend => anyhow::bail!("Unsupported store backend: {}", backend),
        }
    }

    pub async fn create_job_queue(&self) -> Result<Arc<dyn DeleteJobQueuePort>> {
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryDeleteJobQueue::with_max_attempts(
                self.job_max_attempts,
            ))),
            "sqlite" => {
                let pool = self.pool()?;
                let queue = SqliteDeleteJobQueue::new(pool.clone(), self.job_max_attempts)
                    .await
                    .context("Failed to initialize SQLite job queue")?;
                Ok(Arc::new(queue))
            }
            backend => anyhow::bail!("Unsupported store backend: {}", backend),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.sqlite_pool
            .as_ref()
            .context("SQLite pool not initialized")
    }
}
