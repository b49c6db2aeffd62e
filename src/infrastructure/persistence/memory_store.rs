//! In-memory document store backends
//!
//! Partition-per-world maps behind an RwLock, mirroring the SQLite backend's
//! semantics exactly: token compare-and-swap on replace, `(created_at, id)`
//! ordering, tombstone filtering. Used by tests and small deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::application::ports::outbound::{
    DeleteOperationStorePort, EntityPage, EntityQuery, EntityStorePort, ParentFilter,
};
use crate::domain::entities::{DeleteOperation, WorldEntity};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{
    DeleteOperationId, EntityId, PageCursor, UserId, VersionToken, WorldId,
};

#[derive(Default)]
pub struct InMemoryEntityStore {
    partitions: RwLock<HashMap<WorldId, HashMap<EntityId, WorldEntity>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_key(entity: &WorldEntity) -> (i64, EntityId) {
    (entity.created_at().timestamp_micros(), entity.id())
}

fn matches_query(entity: &WorldEntity, query: &EntityQuery) -> bool {
    if entity.is_deleted() {
        return false;
    }
    match query.parent {
        ParentFilter::Roots => {
            if entity.parent_id().is_some() {
                return false;
            }
        }
        ParentFilter::ChildrenOf(parent_id) => {
            if entity.parent_id() != Some(parent_id) {
                return false;
            }
        }
        ParentFilter::Any => {}
    }
    if let Some(kind) = query.kind {
        if entity.kind() != kind {
            return false;
        }
    }
    query
        .tags
        .iter()
        .all(|tag| entity.tags().iter().any(|t| t == tag))
}

#[async_trait]
impl EntityStorePort for InMemoryEntityStore {
    async fn insert(&self, entity: &WorldEntity) -> Result<WorldEntity, EntityError> {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(entity.world_id()).or_default();
        if partition.contains_key(&entity.id()) {
            return Err(EntityError::Backend(format!(
                "Entity already exists: {}",
                entity.id()
            )));
        }
        let mut stored = entity.clone();
        stored.set_version(VersionToken::mint());
        partition.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        entity: &WorldEntity,
        expected_version: Option<&VersionToken>,
    ) -> Result<WorldEntity, EntityError> {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(entity.world_id()).or_default();
        let current = partition
            .get(&entity.id())
            .ok_or(EntityError::EntityNotFound(entity.id()))?;
        if let Some(expected) = expected_version {
            if current.version() != Some(expected) {
                return Err(EntityError::VersionConflict {
                    expected: expected.to_string(),
                    actual: current
                        .version()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                });
            }
        }
        let mut stored = entity.clone();
        stored.set_version(VersionToken::mint());
        partition.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    async fn find(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<Option<WorldEntity>, EntityError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&world_id)
            .and_then(|partition| partition.get(&entity_id))
            .cloned())
    }

    async fn query(
        &self,
        world_id: WorldId,
        query: &EntityQuery,
    ) -> Result<EntityPage, EntityError> {
        let partitions = self.partitions.read().await;
        let mut matches: Vec<WorldEntity> = partitions
            .get(&world_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|entity| matches_query(entity, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by_key(sort_key);

        if let Some(cursor) = &query.cursor {
            let after = (cursor.created_at_us(), cursor.id());
            matches.retain(|entity| sort_key(entity) > after);
        }

        let limit = query.limit as usize;
        let next_cursor = if matches.len() > limit {
            matches.truncate(limit);
            matches
                .last()
                .map(|last| PageCursor::after(last.created_at(), last.id()))
        } else {
            None
        };
        Ok(EntityPage {
            items: matches,
            next_cursor,
        })
    }

    async fn children(
        &self,
        world_id: WorldId,
        parent_id: EntityId,
        include_deleted: bool,
    ) -> Result<Vec<WorldEntity>, EntityError> {
        let partitions = self.partitions.read().await;
        let mut children: Vec<WorldEntity> = partitions
            .get(&world_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|entity| entity.parent_id() == Some(parent_id))
                    .filter(|entity| include_deleted || !entity.is_deleted())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        children.sort_by_key(sort_key);
        Ok(children)
    }
}

#[derive(Default)]
pub struct InMemoryOperationStore {
    partitions: RwLock<HashMap<WorldId, HashMap<DeleteOperationId, DeleteOperation>>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeleteOperationStorePort for InMemoryOperationStore {
    async fn insert(&self, operation: &DeleteOperation) -> Result<DeleteOperation, EntityError> {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(operation.world_id()).or_default();
        if partition.contains_key(&operation.id()) {
            return Err(EntityError::Backend(format!(
                "Delete operation already exists: {}",
                operation.id()
            )));
        }
        let mut stored = operation.clone();
        stored.set_version(VersionToken::mint());
        partition.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        operation: &DeleteOperation,
        expected_version: Option<&VersionToken>,
    ) -> Result<DeleteOperation, EntityError> {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(operation.world_id()).or_default();
        let current = partition
            .get(&operation.id())
            .ok_or(EntityError::OperationNotFound(operation.id()))?;
        if let Some(expected) = expected_version {
            if current.version() != Some(expected) {
                return Err(EntityError::VersionConflict {
                    expected: expected.to_string(),
                    actual: current
                        .version()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                });
            }
        }
        let mut stored = operation.clone();
        stored.set_version(VersionToken::mint());
        partition.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    async fn find(
        &self,
        world_id: WorldId,
        operation_id: DeleteOperationId,
    ) -> Result<Option<DeleteOperation>, EntityError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&world_id)
            .and_then(|partition| partition.get(&operation_id))
            .cloned())
    }

    async fn recent_by_world(
        &self,
        world_id: WorldId,
        limit: u32,
    ) -> Result<Vec<DeleteOperation>, EntityError> {
        let partitions = self.partitions.read().await;
        let mut operations: Vec<DeleteOperation> = partitions
            .get(&world_id)
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default();
        operations.sort_by_key(|op| std::cmp::Reverse((op.created_at(), op.id())));
        operations.truncate(limit as usize);
        Ok(operations)
    }

    async fn count_active_by_user(
        &self,
        world_id: WorldId,
        user_id: UserId,
    ) -> Result<u64, EntityError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&world_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|op| op.created_by() == user_id && !op.is_terminal())
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn purge_expired(&self) -> Result<u64, EntityError> {
        let now = Utc::now();
        let mut purged = 0;
        let mut partitions = self.partitions.write().await;
        for partition in partitions.values_mut() {
            let before = partition.len();
            partition.retain(|_, op| op.expires_at() > now);
            purged += (before - partition.len()) as u64;
        }
        Ok(purged)
    }
}
