//! Shared application state

use std::sync::Arc;

use anyhow::Result;

use crate::application::ports::outbound::{DeleteJobQueuePort, DeleteOperationStorePort};
use crate::application::services::{CascadeDeleteService, EntityService, SchemaVersions};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::identity::{FixedIdentity, SingleOwnerDirectory};
use crate::infrastructure::persistence::StoreFactory;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub entity_service: Arc<EntityService>,
    pub cascade_delete_service: Arc<CascadeDeleteService>,
    /// Exposed for the worker and maintenance loops
    pub job_queue: Arc<dyn DeleteJobQueuePort>,
    pub operation_store: Arc<dyn DeleteOperationStorePort>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let factory = StoreFactory::new(config.store.clone(), config.job_max_attempts).await?;
        let entity_store = factory.create_entity_store().await?;
        let operation_store = factory.create_operation_store().await?;
        let job_queue = factory.create_job_queue().await?;

        let identity = Arc::new(FixedIdentity::new(config.owner_id));
        let worlds = Arc::new(SingleOwnerDirectory::new(config.owner_id));

        let entity_service = Arc::new(EntityService::new(
            entity_store,
            identity,
            worlds,
            SchemaVersions::default(),
        ));
        let cascade_delete_service = Arc::new(CascadeDeleteService::new(
            entity_service.clone(),
            operation_store.clone(),
            job_queue.clone(),
            config.delete.clone(),
        ));

        Ok(Self {
            config,
            entity_service,
            cascade_delete_service,
            job_queue,
            operation_store,
        })
    }
}
