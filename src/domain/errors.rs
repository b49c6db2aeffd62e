//! Error taxonomy shared by the store ports and application services
//!
//! Validation and authorization failures surface synchronously at the call
//! site. Per-node failures during an asynchronous cascade delete are recorded
//! on the operation record instead of being raised from `process`.

use crate::domain::value_objects::{DeleteOperationId, EntityId, UserId, WorldId};

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("World not found: {0}")]
    WorldNotFound(WorldId),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Delete operation not found: {0}")]
    OperationNotFound(DeleteOperationId),

    #[error("Not authorized to access world {0}")]
    Unauthorized(WorldId),

    #[error("Parent entity not found: {0}")]
    ParentNotFound(EntityId),

    #[error("Setting parent of {entity_id} to {parent_id} would create a cycle")]
    CircularReference {
        entity_id: EntityId,
        parent_id: EntityId,
    },

    #[error("Entity {0} has children; delete with cascade to remove the subtree")]
    HasChildren(EntityId),

    #[error("Version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schema version downgrade from {stored} to {requested} is not allowed")]
    SchemaDowngrade { stored: u32, requested: u32 },

    #[error("User {user_id} already has {limit} active delete operations in world {world_id}")]
    TooManyActiveOperations {
        user_id: UserId,
        world_id: WorldId,
        limit: u32,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EntityError {
    /// Whether retrying the same call can succeed. Conflicts and backend
    /// outages are transient; everything else is a caller error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EntityError::VersionConflict { .. } | EntityError::Backend(_)
        )
    }
}
