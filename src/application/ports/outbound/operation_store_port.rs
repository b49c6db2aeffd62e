//! Delete-operation store port - partition-scoped access to progress records
//!
//! The operation record is the durable source of truth for cascade-delete
//! progress; polling reads come straight from here, never recomputed from the
//! entity tree.

use async_trait::async_trait;

use crate::domain::entities::DeleteOperation;
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{DeleteOperationId, UserId, VersionToken, WorldId};

#[async_trait]
pub trait DeleteOperationStorePort: Send + Sync {
    /// Persist a new operation record. Returns the stored snapshot with its
    /// assigned version token.
    async fn insert(&self, operation: &DeleteOperation) -> Result<DeleteOperation, EntityError>;

    /// Replace the stored record. Same compare-and-swap contract as the
    /// entity store.
    async fn replace(
        &self,
        operation: &DeleteOperation,
        expected_version: Option<&VersionToken>,
    ) -> Result<DeleteOperation, EntityError>;

    async fn find(
        &self,
        world_id: WorldId,
        operation_id: DeleteOperationId,
    ) -> Result<Option<DeleteOperation>, EntityError>;

    /// Most recent operations in a world, newest first.
    async fn recent_by_world(
        &self,
        world_id: WorldId,
        limit: u32,
    ) -> Result<Vec<DeleteOperation>, EntityError>;

    /// Count of a user's non-terminal operations in a world; backs the
    /// per-user concurrency cap.
    async fn count_active_by_user(
        &self,
        world_id: WorldId,
        user_id: UserId,
    ) -> Result<u64, EntityError>;

    /// Drop records past their retention window. Returns how many were
    /// reaped. Driven by a maintenance loop, not by the orchestrator.
    async fn purge_expired(&self) -> Result<u64, EntityError>;
}
