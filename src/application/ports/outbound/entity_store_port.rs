//! Entity store port - partition-scoped document access for world entities
//!
//! Every method is bound to the owning world's partition key; no call can
//! scan across worlds. Writes return the stored snapshot carrying the fresh
//! version token the store minted for it; `replace` compares an optional
//! expected token first and fails with `VersionConflict` on mismatch.

use async_trait::async_trait;

use crate::domain::entities::{EntityKind, WorldEntity};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{EntityId, PageCursor, VersionToken, WorldId};

/// Hierarchy filter for entity listings.
///
/// The default lists roots; `Any` ignores the hierarchy entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentFilter {
    #[default]
    Roots,
    ChildrenOf(EntityId),
    Any,
}

/// Filters and pagination for a partition-scoped entity listing.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub parent: ParentFilter,
    pub kind: Option<EntityKind>,
    /// Entities must carry every listed tag.
    pub tags: Vec<String>,
    /// Clamped by the service to `[1, 200]`.
    pub limit: u32,
    pub cursor: Option<PageCursor>,
}

/// One page of a listing, ordered by `(created_at, id)`.
#[derive(Debug, Clone)]
pub struct EntityPage {
    pub items: Vec<WorldEntity>,
    /// `None` when the listing is exhausted.
    pub next_cursor: Option<PageCursor>,
}

#[async_trait]
pub trait EntityStorePort: Send + Sync {
    /// Persist a new entity. Returns the stored snapshot with its assigned
    /// version token.
    async fn insert(&self, entity: &WorldEntity) -> Result<WorldEntity, EntityError>;

    /// Replace the stored snapshot wholesale. When `expected_version` is
    /// supplied it must match the stored token or the write fails with
    /// `VersionConflict`. Fails with `EntityNotFound` if the row is gone.
    async fn replace(
        &self,
        entity: &WorldEntity,
        expected_version: Option<&VersionToken>,
    ) -> Result<WorldEntity, EntityError>;

    /// Point read within the partition. Returns soft-deleted rows too;
    /// callers that want live data filter on `is_deleted`.
    async fn find(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<Option<WorldEntity>, EntityError>;

    /// Cursor-paged listing of non-deleted entities in the partition.
    async fn query(&self, world_id: WorldId, query: &EntityQuery)
        -> Result<EntityPage, EntityError>;

    /// Direct children of `parent_id`, ordered by `(created_at, id)`.
    /// Soft-deleted rows are excluded unless `include_deleted` is set (the
    /// cascade engine traverses through tombstones on resume).
    async fn children(
        &self,
        world_id: WorldId,
        parent_id: EntityId,
        include_deleted: bool,
    ) -> Result<Vec<WorldEntity>, EntityError>;
}
