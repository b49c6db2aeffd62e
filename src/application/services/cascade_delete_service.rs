//! Cascade Delete Service - asynchronous subtree deletion with progress tracking
//!
//! A subtree can be far too large to delete inside one request, so deletion
//! is split in two: `initiate` authorizes the request, records a `Pending`
//! operation, and enqueues a job; a background worker later drives `process`,
//! which discovers the subtree, soft-deletes it in rate-limited batches, and
//! folds per-node failures into the record instead of aborting.
//!
//! `process` is idempotent and resumable: terminal records are returned
//! untouched, already-tombstoned nodes are skipped without double counting,
//! and a crashed run picks up where it left off when the job is redelivered.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::application::ports::outbound::{
    DeleteJob, DeleteJobQueuePort, DeleteOperationStorePort,
};
use crate::application::services::EntityService;
use crate::domain::entities::{DeleteOperation, DEFAULT_OPERATION_TTL_SECONDS};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{DeleteOperationId, EntityId, WorldId};

/// Tuning knobs for the cascade engine, consumed - never computed - here.
#[derive(Debug, Clone)]
pub struct DeleteConfig {
    /// Cap on a user's simultaneously active operations per world.
    pub max_concurrent_per_user_per_world: u32,
    /// Entities soft-deleted per batch within one `process` run.
    pub max_batch_size: usize,
    /// Upper bound on soft-delete writes per second; 0 disables throttling.
    pub rate_limit_per_second: u32,
    /// Retention window stamped on new operation records.
    pub operation_ttl_seconds: u64,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_user_per_world: 3,
            max_batch_size: 25,
            rate_limit_per_second: 50,
            operation_ttl_seconds: DEFAULT_OPERATION_TTL_SECONDS,
        }
    }
}

/// Orchestrates tracked, resumable subtree deletions
pub struct CascadeDeleteService {
    entities: Arc<EntityService>,
    operations: Arc<dyn DeleteOperationStorePort>,
    jobs: Arc<dyn DeleteJobQueuePort>,
    config: DeleteConfig,
}

impl CascadeDeleteService {
    pub fn new(
        entities: Arc<EntityService>,
        operations: Arc<dyn DeleteOperationStorePort>,
        jobs: Arc<dyn DeleteJobQueuePort>,
        config: DeleteConfig,
    ) -> Self {
        Self {
            entities,
            operations,
            jobs,
            config,
        }
    }

    /// Start a delete operation. Returns the `Pending` record immediately;
    /// the subtree is not touched until a worker picks up the job.
    #[instrument(skip(self))]
    pub async fn initiate(
        &self,
        world_id: WorldId,
        root_entity_id: EntityId,
        cascade: bool,
    ) -> Result<DeleteOperation, EntityError> {
        let user = self.entities.authorize(world_id).await?;

        let active = self
            .operations
            .count_active_by_user(world_id, user)
            .await?;
        let limit = self.config.max_concurrent_per_user_per_world;
        if active >= limit as u64 {
            return Err(EntityError::TooManyActiveOperations {
                user_id: user,
                world_id,
                limit,
            });
        }

        // Read through tombstones so an already-deleted root is a clean
        // not-found instead of a confusing mid-run failure.
        let root = self
            .entities
            .find_any(world_id, root_entity_id)
            .await?
            .filter(|root| !root.is_deleted())
            .ok_or(EntityError::EntityNotFound(root_entity_id))?;

        if !cascade && root.has_children() {
            return Err(EntityError::HasChildren(root_entity_id));
        }

        let operation =
            DeleteOperation::new(&root, cascade, user, self.config.operation_ttl_seconds);
        let persisted = self.operations.insert(&operation).await?;

        self.jobs
            .enqueue(DeleteJob {
                world_id,
                operation_id: persisted.id(),
            })
            .await
            .map_err(|e| EntityError::Backend(e.to_string()))?;

        info!(
            operation_id = %persisted.id(),
            root_entity_id = %root_entity_id,
            cascade,
            "Initiated delete of '{}' in world {}",
            root.name(),
            world_id
        );
        Ok(persisted)
    }

    /// Execute (or resume) an operation. Runs in worker context: the record
    /// was authorized at initiation and carries the acting user.
    ///
    /// Per-node failures are recorded and processing continues; only
    /// infrastructure failures (store unreachable, record gone) error out of
    /// this call, and the caller may safely retry it.
    #[instrument(skip(self), fields(world_id = %world_id, operation_id = %operation_id))]
    pub async fn process(
        &self,
        world_id: WorldId,
        operation_id: DeleteOperationId,
    ) -> Result<DeleteOperation, EntityError> {
        let mut operation = self
            .operations
            .find(world_id, operation_id)
            .await?
            .ok_or(EntityError::OperationNotFound(operation_id))?;

        if operation.is_terminal() {
            debug!(status = %operation.status(), "Operation already terminal; nothing to do");
            return Ok(operation);
        }

        let actor = operation.created_by();

        let Some(root) = self
            .entities
            .find_any(world_id, operation.root_entity_id())
            .await?
        else {
            operation.fail_with("Root entity no longer exists")?;
            return self.save(operation).await;
        };

        let mut nodes = vec![root.clone()];
        if operation.cascade() {
            // Traverse through tombstones: a run that died halfway leaves
            // deleted inner nodes whose live descendants still need covering.
            nodes.extend(
                self.entities
                    .collect_descendants(world_id, root.id(), true)
                    .await?,
            );
        }

        operation.begin(nodes.len() as u64)?;
        operation = self.save(operation).await?;
        info!(
            total = operation.total_entities(),
            "Processing delete of '{}'",
            operation.root_entity_name()
        );

        let batch_size = self.config.max_batch_size.max(1);
        let batch_count = nodes.len().div_ceil(batch_size);
        for (index, batch) in nodes.chunks(batch_size).enumerate() {
            let outcomes = join_all(batch.iter().map(|node| async move {
                if node.is_deleted() {
                    // Tombstoned by an earlier run or a direct delete;
                    // already handled, never double-counted.
                    return (node.id(), Ok(false));
                }
                (
                    node.id(),
                    self.entities
                        .soft_delete_node(world_id, node.id(), actor)
                        .await,
                )
            }))
            .await;

            for (entity_id, outcome) in outcomes {
                match outcome {
                    Ok(true) => operation.record_deleted(1),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(entity_id = %entity_id, "Failed to soft-delete entity: {e}");
                        operation.record_failure(entity_id);
                    }
                }
            }

            operation = self.save(operation).await?;

            if index + 1 < batch_count {
                self.throttle(batch.len()).await;
            }
        }

        // Only once every child has been processed; the flag must not flap
        // while the subtree is mid-delete.
        if let Some(parent_id) = root.parent_id() {
            self.entities
                .refresh_has_children(world_id, parent_id)
                .await?;
        }

        operation.finish()?;
        let operation = self.save(operation).await?;
        info!(
            status = %operation.status(),
            deleted = operation.deleted_count(),
            failed = operation.failed_count(),
            "Finished delete of '{}'",
            operation.root_entity_name()
        );
        Ok(operation)
    }

    /// Progress read for polling callers; served from the operation record.
    #[instrument(skip(self))]
    pub async fn get_operation(
        &self,
        world_id: WorldId,
        operation_id: DeleteOperationId,
    ) -> Result<DeleteOperation, EntityError> {
        self.entities.authorize(world_id).await?;
        self.operations
            .find(world_id, operation_id)
            .await?
            .ok_or(EntityError::OperationNotFound(operation_id))
    }

    /// Most recent operations in a world, newest first.
    #[instrument(skip(self))]
    pub async fn recent_operations(
        &self,
        world_id: WorldId,
        limit: u32,
    ) -> Result<Vec<DeleteOperation>, EntityError> {
        self.entities.authorize(world_id).await?;
        self.operations
            .recent_by_world(world_id, limit.clamp(1, 100))
            .await
    }

    /// The caller's non-terminal operation count in a world.
    #[instrument(skip(self))]
    pub async fn count_active(&self, world_id: WorldId) -> Result<u64, EntityError> {
        let user = self.entities.authorize(world_id).await?;
        self.operations.count_active_by_user(world_id, user).await
    }

    async fn save(&self, operation: DeleteOperation) -> Result<DeleteOperation, EntityError> {
        self.operations
            .replace(&operation, operation.version())
            .await
    }

    async fn throttle(&self, batch_len: usize) {
        if self.config.rate_limit_per_second == 0 {
            return;
        }
        let pause = batch_len as f64 / self.config.rate_limit_per_second as f64;
        tokio::time::sleep(Duration::from_secs_f64(pause)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    use crate::application::ports::outbound::{
        EntityPage, EntityQuery, EntityStorePort,
    };
    use crate::application::services::{CreateEntityRequest, SchemaVersions};
    use crate::domain::entities::{
        DeleteOperationStatus, EntityKind, WorldEntity,
    };
    use crate::domain::value_objects::{UserId, VersionToken};
    use crate::infrastructure::identity::{FixedIdentity, MappedWorldDirectory};
    use crate::infrastructure::persistence::{InMemoryEntityStore, InMemoryOperationStore};
    use crate::infrastructure::queues::InMemoryDeleteJobQueue;

    /// Entity store that fails tombstone writes for chosen ids.
    struct FlakyEntityStore {
        inner: InMemoryEntityStore,
        failing: Mutex<HashSet<EntityId>>,
    }

    impl FlakyEntityStore {
        fn new() -> Self {
            Self {
                inner: InMemoryEntityStore::new(),
                failing: Mutex::new(HashSet::new()),
            }
        }

        async fn fail_deletes_of(&self, entity_id: EntityId) {
            self.failing.lock().await.insert(entity_id);
        }
    }

    #[async_trait]
    impl EntityStorePort for FlakyEntityStore {
        async fn insert(&self, entity: &WorldEntity) -> Result<WorldEntity, EntityError> {
            self.inner.insert(entity).await
        }

        async fn replace(
            &self,
            entity: &WorldEntity,
            expected_version: Option<&VersionToken>,
        ) -> Result<WorldEntity, EntityError> {
            if entity.is_deleted() && self.failing.lock().await.contains(&entity.id()) {
                return Err(EntityError::Backend("injected write failure".to_string()));
            }
            self.inner.replace(entity, expected_version).await
        }

        async fn find(
            &self,
            world_id: WorldId,
            entity_id: EntityId,
        ) -> Result<Option<WorldEntity>, EntityError> {
            self.inner.find(world_id, entity_id).await
        }

        async fn query(
            &self,
            world_id: WorldId,
            query: &EntityQuery,
        ) -> Result<EntityPage, EntityError> {
            self.inner.query(world_id, query).await
        }

        async fn children(
            &self,
            world_id: WorldId,
            parent_id: EntityId,
            include_deleted: bool,
        ) -> Result<Vec<WorldEntity>, EntityError> {
            self.inner.children(world_id, parent_id, include_deleted).await
        }
    }

    struct Fixture {
        entities: Arc<EntityService>,
        service: CascadeDeleteService,
        queue: Arc<InMemoryDeleteJobQueue>,
        world_id: WorldId,
    }

    async fn fixture_with_store(
        store: Arc<dyn EntityStorePort>,
        config: DeleteConfig,
    ) -> Fixture {
        let user = UserId::new();
        let world_id = WorldId::new();
        let worlds = MappedWorldDirectory::new();
        worlds.register(world_id, user).await;

        let entities = Arc::new(EntityService::new(
            store,
            Arc::new(FixedIdentity::new(user)),
            Arc::new(worlds),
            SchemaVersions::default(),
        ));
        let queue = Arc::new(InMemoryDeleteJobQueue::new());
        let service = CascadeDeleteService::new(
            entities.clone(),
            Arc::new(InMemoryOperationStore::new()),
            queue.clone(),
            config,
        );
        Fixture {
            entities,
            service,
            queue,
            world_id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_store(
            Arc::new(InMemoryEntityStore::new()),
            DeleteConfig {
                max_batch_size: 2,
                rate_limit_per_second: 0,
                ..Default::default()
            },
        )
        .await
    }

    fn request(world_id: WorldId, parent_id: Option<EntityId>, name: &str) -> CreateEntityRequest {
        CreateEntityRequest {
            world_id,
            parent_id,
            kind: EntityKind::Location,
            name: name.to_string(),
            description: None,
            tags: vec![],
            attributes: serde_json::json!({}),
            schema_version: None,
        }
    }

    /// A -> B -> C chain; returns the three ids.
    async fn seed_chain(fx: &Fixture) -> (EntityId, EntityId, EntityId) {
        let a = fx
            .entities
            .create(request(fx.world_id, None, "A"))
            .await
            .unwrap();
        let b = fx
            .entities
            .create(request(fx.world_id, Some(a.id()), "B"))
            .await
            .unwrap();
        let c = fx
            .entities
            .create(request(fx.world_id, Some(b.id()), "C"))
            .await
            .unwrap();
        (a.id(), b.id(), c.id())
    }

    #[tokio::test]
    async fn test_initiate_returns_pending_and_enqueues_job() {
        let fx = fixture().await;
        let (a, _, _) = seed_chain(&fx).await;

        let operation = fx.service.initiate(fx.world_id, a, true).await.unwrap();
        assert_eq!(operation.status(), DeleteOperationStatus::Pending);
        assert!(operation.cascade());
        assert_eq!(operation.root_entity_id(), a);
        assert_eq!(operation.root_entity_name(), "A");
        assert_eq!(fx.queue.depth().await.unwrap(), 1);

        // Nothing touched yet.
        assert!(fx.entities.get(fx.world_id, a).await.is_ok());
    }

    #[tokio::test]
    async fn test_initiate_rejects_missing_or_deleted_root() {
        let fx = fixture().await;
        let ghost = EntityId::new();
        let result = fx.service.initiate(fx.world_id, ghost, true).await;
        assert!(matches!(result, Err(EntityError::EntityNotFound(id)) if id == ghost));

        let doomed = fx
            .entities
            .create(request(fx.world_id, None, "Doomed"))
            .await
            .unwrap();
        fx.entities
            .delete(fx.world_id, doomed.id(), false)
            .await
            .unwrap();
        let result = fx.service.initiate(fx.world_id, doomed.id(), true).await;
        assert!(matches!(result, Err(EntityError::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn test_initiate_without_cascade_rejects_parents() {
        let fx = fixture().await;
        let (a, _, _) = seed_chain(&fx).await;
        let result = fx.service.initiate(fx.world_id, a, false).await;
        assert!(matches!(result, Err(EntityError::HasChildren(id)) if id == a));
    }

    #[tokio::test]
    async fn test_initiate_enforces_per_user_cap() {
        let fx = fixture_with_store(
            Arc::new(InMemoryEntityStore::new()),
            DeleteConfig {
                max_concurrent_per_user_per_world: 1,
                rate_limit_per_second: 0,
                ..Default::default()
            },
        )
        .await;

        let first = fx
            .entities
            .create(request(fx.world_id, None, "First"))
            .await
            .unwrap();
        let second = fx
            .entities
            .create(request(fx.world_id, None, "Second"))
            .await
            .unwrap();

        fx.service
            .initiate(fx.world_id, first.id(), true)
            .await
            .unwrap();
        assert_eq!(fx.service.count_active(fx.world_id).await.unwrap(), 1);

        let result = fx.service.initiate(fx.world_id, second.id(), true).await;
        assert!(matches!(
            result,
            Err(EntityError::TooManyActiveOperations { limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_process_deletes_whole_subtree() {
        let fx = fixture().await;
        let (a, b, c) = seed_chain(&fx).await;

        let operation = fx.service.initiate(fx.world_id, a, true).await.unwrap();
        let done = fx
            .service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();

        assert_eq!(done.status(), DeleteOperationStatus::Completed);
        assert_eq!(done.total_entities(), 3);
        assert_eq!(done.deleted_count(), 3);
        assert_eq!(done.failed_count(), 0);
        assert!(done.started_at().is_some());
        assert!(done.completed_at().is_some());

        for id in [a, b, c] {
            assert!(fx.entities.get(fx.world_id, id).await.is_err());
        }

        // Polling sees the terminal record.
        let polled = fx
            .service
            .get_operation(fx.world_id, operation.id())
            .await
            .unwrap();
        assert_eq!(polled.status(), DeleteOperationStatus::Completed);
    }

    #[tokio::test]
    async fn test_process_records_partial_failure() {
        let store = Arc::new(FlakyEntityStore::new());
        let fx = fixture_with_store(
            store.clone(),
            DeleteConfig {
                max_batch_size: 2,
                rate_limit_per_second: 0,
                ..Default::default()
            },
        )
        .await;
        let (a, b, c) = seed_chain(&fx).await;
        store.fail_deletes_of(c).await;

        let operation = fx.service.initiate(fx.world_id, a, true).await.unwrap();
        let done = fx
            .service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();

        assert_eq!(done.status(), DeleteOperationStatus::Partial);
        assert_eq!(done.deleted_count(), 2);
        assert_eq!(done.failed_count(), 1);
        assert_eq!(done.failed_entity_ids(), &[c]);
        assert!(done.error_details().unwrap().contains("1 of 3"));

        // The survivor is still readable; the rest are tombstoned.
        assert!(fx.entities.get(fx.world_id, c).await.is_ok());
        assert!(fx.entities.get(fx.world_id, a).await.is_err());
        assert!(fx.entities.get(fx.world_id, b).await.is_err());
    }

    #[tokio::test]
    async fn test_process_skips_already_tombstoned_nodes() {
        let fx = fixture().await;
        let (a, _, c) = seed_chain(&fx).await;

        // C removed synchronously before the job runs.
        fx.entities.delete(fx.world_id, c, false).await.unwrap();

        let operation = fx.service.initiate(fx.world_id, a, true).await.unwrap();
        let done = fx
            .service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();

        assert_eq!(done.status(), DeleteOperationStatus::Completed);
        assert_eq!(done.total_entities(), 3);
        assert_eq!(done.deleted_count(), 2);
        assert_eq!(done.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_process_is_idempotent_on_rerun() {
        let fx = fixture().await;
        let (a, _, _) = seed_chain(&fx).await;

        let operation = fx.service.initiate(fx.world_id, a, true).await.unwrap();
        let first = fx
            .service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();
        let second = fx
            .service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();

        assert_eq!(second.status(), DeleteOperationStatus::Completed);
        assert_eq!(second.deleted_count(), first.deleted_count());
        assert_eq!(second.completed_at(), first.completed_at());
    }

    #[tokio::test]
    async fn test_process_unknown_operation_fails() {
        let fx = fixture().await;
        let ghost = DeleteOperationId::new();
        let result = fx.service.process(fx.world_id, ghost).await;
        assert!(matches!(result, Err(EntityError::OperationNotFound(id)) if id == ghost));
    }

    #[tokio::test]
    async fn test_process_clears_parent_flag() {
        let fx = fixture().await;
        let parent = fx
            .entities
            .create(request(fx.world_id, None, "Parent"))
            .await
            .unwrap();
        let child = fx
            .entities
            .create(request(fx.world_id, Some(parent.id()), "Child"))
            .await
            .unwrap();

        let operation = fx
            .service
            .initiate(fx.world_id, child.id(), true)
            .await
            .unwrap();
        fx.service
            .process(fx.world_id, operation.id())
            .await
            .unwrap();

        let parent = fx.entities.get(fx.world_id, parent.id()).await.unwrap();
        assert!(!parent.has_children());
    }

    #[tokio::test]
    async fn test_recent_operations_newest_first() {
        let fx = fixture().await;
        let first = fx
            .entities
            .create(request(fx.world_id, None, "First"))
            .await
            .unwrap();
        let second = fx
            .entities
            .create(request(fx.world_id, None, "Second"))
            .await
            .unwrap();

        let op_a = fx
            .service
            .initiate(fx.world_id, first.id(), false)
            .await
            .unwrap();
        let op_b = fx
            .service
            .initiate(fx.world_id, second.id(), false)
            .await
            .unwrap();

        let recent = fx.service.recent_operations(fx.world_id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id(), op_b.id());
        assert_eq!(recent[1].id(), op_a.id());
    }
}
