//! Entity Service - Application service for world-content hierarchy management
//!
//! This service provides the use case implementations for creating, updating,
//! moving, listing, and soft-deleting entities within a world, and keeps the
//! denormalized hierarchy metadata (path, depth, has_children) consistent
//! while doing so.
//!
//! Every operation authorizes against the world owner and is scoped to the
//! world partition. Nothing is ever mutated without first being read, so each
//! write carries the version token of the snapshot it replaces.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::application::ports::outbound::{
    EntityPage, EntityQuery, EntityStorePort, IdentityPort, WorldDirectoryPort,
};
use crate::application::services::SchemaVersions;
use crate::domain::entities::{EntityKind, WorldEntity};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{EntityId, UserId, VersionToken, WorldId};

/// Page size bounds for listings.
pub const LIST_LIMIT_MAX: u32 = 200;

/// Attempts for denormalized-flag writes that race other writers.
const FLAG_RETRY_LIMIT: u32 = 3;

/// Request to create a new entity
#[derive(Debug, Clone)]
pub struct CreateEntityRequest {
    pub world_id: WorldId,
    pub parent_id: Option<EntityId>,
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub attributes: serde_json::Value,
    /// Omitted: stamped with the current schema version for the kind.
    pub schema_version: Option<u32>,
}

/// Request to update an existing entity
///
/// `parent_id` is a tristate: `None` leaves the parent alone, `Some(None)`
/// moves the entity to the root, `Some(Some(id))` re-parents it.
#[derive(Debug, Clone, Default)]
pub struct UpdateEntityRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub attributes: Option<serde_json::Value>,
    pub parent_id: Option<Option<EntityId>>,
    pub schema_version: Option<u32>,
    /// When supplied, the write fails with `VersionConflict` unless it
    /// matches the stored token.
    pub expected_version: Option<VersionToken>,
}

/// Entity service over the partition-scoped store
pub struct EntityService {
    store: Arc<dyn EntityStorePort>,
    identity: Arc<dyn IdentityPort>,
    worlds: Arc<dyn WorldDirectoryPort>,
    schemas: SchemaVersions,
}

impl EntityService {
    pub fn new(
        store: Arc<dyn EntityStorePort>,
        identity: Arc<dyn IdentityPort>,
        worlds: Arc<dyn WorldDirectoryPort>,
        schemas: SchemaVersions,
    ) -> Self {
        Self {
            store,
            identity,
            worlds,
            schemas,
        }
    }

    /// Get a non-deleted entity by id
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<WorldEntity, EntityError> {
        self.authorize(world_id).await?;
        self.store
            .find(world_id, entity_id)
            .await?
            .filter(|entity| !entity.is_deleted())
            .ok_or(EntityError::EntityNotFound(entity_id))
    }

    /// Get an entity by id even when soft-deleted. The cascade engine uses
    /// this to distinguish "already tombstoned" from "gone".
    #[instrument(skip(self))]
    pub async fn get_including_deleted(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<WorldEntity, EntityError> {
        self.authorize(world_id).await?;
        self.store
            .find(world_id, entity_id)
            .await?
            .ok_or(EntityError::EntityNotFound(entity_id))
    }

    /// List non-deleted entities in a world, cursor-paged in `(created_at,
    /// id)` order
    #[instrument(skip(self, query), fields(world_id = %world_id))]
    pub async fn list(
        &self,
        world_id: WorldId,
        query: EntityQuery,
    ) -> Result<EntityPage, EntityError> {
        self.authorize(world_id).await?;
        let query = EntityQuery {
            limit: query.limit.clamp(1, LIST_LIMIT_MAX),
            ..query
        };
        self.store.query(world_id, &query).await
    }

    /// Direct, non-deleted children of a parent
    #[instrument(skip(self))]
    pub async fn children(
        &self,
        world_id: WorldId,
        parent_id: EntityId,
    ) -> Result<Vec<WorldEntity>, EntityError> {
        self.authorize(world_id).await?;
        self.store
            .find(world_id, parent_id)
            .await?
            .filter(|parent| !parent.is_deleted())
            .ok_or(EntityError::ParentNotFound(parent_id))?;
        self.store.children(world_id, parent_id, false).await
    }

    /// Full non-deleted subtree below an entity, breadth-first
    #[instrument(skip(self))]
    pub async fn descendants(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<Vec<WorldEntity>, EntityError> {
        self.authorize(world_id).await?;
        self.store
            .find(world_id, entity_id)
            .await?
            .filter(|entity| !entity.is_deleted())
            .ok_or(EntityError::EntityNotFound(entity_id))?;
        self.collect_descendants(world_id, entity_id, false).await
    }

    /// Create an entity, raising the parent's `has_children` flag when needed
    #[instrument(skip(self, request), fields(world_id = %request.world_id, name = %request.name))]
    pub async fn create(&self, request: CreateEntityRequest) -> Result<WorldEntity, EntityError> {
        let user = self.authorize(request.world_id).await?;

        let parent = match request.parent_id {
            Some(parent_id) => Some(
                self.store
                    .find(request.world_id, parent_id)
                    .await?
                    .filter(|parent| !parent.is_deleted())
                    .ok_or(EntityError::ParentNotFound(parent_id))?,
            ),
            None => None,
        };

        let schema_version =
            self.schemas
                .stamp_for_write(request.kind, request.schema_version, None)?;

        let entity = WorldEntity::create(
            request.world_id,
            parent.as_ref(),
            request.kind,
            request.name,
            request.description.unwrap_or_default(),
            request.tags,
            request.attributes,
            user,
            schema_version,
        )?;

        let persisted = self.store.insert(&entity).await?;

        // The store has no multi-document transaction; the parent flag is a
        // follow-up write. A lost race here is corrected by the next
        // recomputation, so a conflict only warns.
        if let Some(parent) = parent {
            if !parent.has_children() {
                if let Err(e) = self
                    .refresh_has_children(request.world_id, parent.id())
                    .await
                {
                    warn!(
                        parent_id = %parent.id(),
                        "Failed to raise has_children after create: {e}"
                    );
                }
            }
        }

        info!(
            entity_id = %persisted.id(),
            kind = %persisted.kind(),
            depth = persisted.depth(),
            "Created entity: {} in world {}",
            persisted.name(),
            request.world_id
        );
        Ok(persisted)
    }

    /// Update an entity, revalidating hierarchy placement when the parent
    /// changes
    #[instrument(skip(self, request), fields(world_id = %world_id, entity_id = %entity_id))]
    pub async fn update(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
        request: UpdateEntityRequest,
    ) -> Result<WorldEntity, EntityError> {
        self.authorize(world_id).await?;

        let current = self
            .store
            .find(world_id, entity_id)
            .await?
            .filter(|entity| !entity.is_deleted())
            .ok_or(EntityError::EntityNotFound(entity_id))?;

        if let Some(expected) = &request.expected_version {
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

        let mut entity = current.clone();

        let mut parent_changed = false;
        let mut new_parent_id = None;
        if let Some(requested_parent) = request.parent_id {
            if requested_parent != current.parent_id() {
                match requested_parent {
                    Some(parent_id) => {
                        self.ensure_no_cycle(world_id, entity_id, parent_id).await?;
                        let parent = self
                            .store
                            .find(world_id, parent_id)
                            .await?
                            .filter(|parent| !parent.is_deleted())
                            .ok_or(EntityError::ParentNotFound(parent_id))?;
                        entity.reparent(Some(&parent))?;
                    }
                    None => entity.reparent(None)?,
                }
                parent_changed = true;
                new_parent_id = requested_parent;
            }
        }

        let schema_version = self.schemas.stamp_for_write(
            entity.kind(),
            request.schema_version,
            Some(current.schema_version()),
        )?;
        entity.set_schema_version(schema_version);

        entity.apply_content_update(
            request.name,
            request.description,
            request.tags,
            request.attributes,
        )?;

        let expected = request.expected_version.as_ref().or(current.version());
        let persisted = self.store.replace(&entity, expected).await?;

        // New parent first: the entity must never look parentless-while-
        // parented in between the two flag writes.
        if parent_changed {
            if let Some(parent_id) = new_parent_id {
                self.refresh_has_children(world_id, parent_id).await?;
            }
            if let Some(parent_id) = current.parent_id() {
                self.refresh_has_children(world_id, parent_id).await?;
            }
        }

        info!(entity_id = %entity_id, "Updated entity: {}", persisted.name());
        Ok(persisted)
    }

    /// Re-parent an entity. Only the moved node's own path/depth are
    /// recomputed; descendants keep their cached values until they are next
    /// written.
    #[instrument(skip(self, expected_version))]
    pub async fn move_entity(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
        new_parent_id: Option<EntityId>,
        expected_version: Option<VersionToken>,
    ) -> Result<WorldEntity, EntityError> {
        self.update(
            world_id,
            entity_id,
            UpdateEntityRequest {
                parent_id: Some(new_parent_id),
                expected_version,
                ..Default::default()
            },
        )
        .await
    }

    /// Soft-delete an entity, and with `cascade` its whole subtree. Returns
    /// the number of entities soft-deleted by this call.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
        cascade: bool,
    ) -> Result<u64, EntityError> {
        let user = self.authorize(world_id).await?;

        let target = self
            .store
            .find(world_id, entity_id)
            .await?
            .filter(|entity| !entity.is_deleted())
            .ok_or(EntityError::EntityNotFound(entity_id))?;

        let children = self.store.children(world_id, entity_id, false).await?;
        if !children.is_empty() && !cascade {
            return Err(EntityError::HasChildren(entity_id));
        }

        let mut deleted = 0u64;
        if cascade {
            // Traverse through tombstones so a subtree partially deleted by
            // an earlier run is still fully covered.
            let subtree = self.collect_descendants(world_id, entity_id, true).await?;
            for node in subtree.iter().filter(|node| !node.is_deleted()) {
                if self.soft_delete_node(world_id, node.id(), user).await? {
                    deleted += 1;
                }
            }
        }

        if self.soft_delete_node(world_id, entity_id, user).await? {
            deleted += 1;
        }

        // Recomputed only after the whole subtree is processed so the flag
        // never flaps mid-delete.
        if let Some(parent_id) = target.parent_id() {
            self.refresh_has_children(world_id, parent_id).await?;
        }

        info!(
            entity_id = %entity_id,
            deleted,
            cascade,
            "Soft-deleted entity: {}",
            target.name()
        );
        Ok(deleted)
    }

    /// Resolve the caller and check world ownership.
    pub(crate) async fn authorize(&self, world_id: WorldId) -> Result<UserId, EntityError> {
        let user = self
            .identity
            .current_user_id()
            .await
            .map_err(|_| EntityError::Unauthorized(world_id))?;
        match self.worlds.world_owner(world_id).await? {
            None => Err(EntityError::WorldNotFound(world_id)),
            Some(owner) if owner != user => Err(EntityError::Unauthorized(world_id)),
            Some(_) => Ok(user),
        }
    }

    /// Point read without authorization or tombstone filtering; cascade
    /// engine use only.
    pub(crate) async fn find_any(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<Option<WorldEntity>, EntityError> {
        self.store.find(world_id, entity_id).await
    }

    /// Breadth-first subtree collection below `root_id` (the root itself is
    /// not included). The visited set keeps malformed data from looping.
    pub(crate) async fn collect_descendants(
        &self,
        world_id: WorldId,
        root_id: EntityId,
        include_deleted: bool,
    ) -> Result<Vec<WorldEntity>, EntityError> {
        let mut collected = Vec::new();
        let mut visited = HashSet::from([root_id]);
        let mut frontier = VecDeque::from([root_id]);
        while let Some(current) = frontier.pop_front() {
            let children = self
                .store
                .children(world_id, current, include_deleted)
                .await?;
            for child in children {
                if visited.insert(child.id()) {
                    frontier.push_back(child.id());
                    collected.push(child);
                }
            }
        }
        debug!(
            root_id = %root_id,
            count = collected.len(),
            "Collected subtree"
        );
        Ok(collected)
    }

    /// Soft-delete a single node. Returns false when it was already deleted
    /// or is gone, so callers never double-count. Retries once when another
    /// writer rotated the token underneath us.
    pub(crate) async fn soft_delete_node(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
        deleted_by: UserId,
    ) -> Result<bool, EntityError> {
        let mut attempts = 0;
        loop {
            let Some(node) = self.store.find(world_id, entity_id).await? else {
                return Ok(false);
            };
            if node.is_deleted() {
                return Ok(false);
            }
            let mut tombstoned = node.clone();
            tombstoned.mark_deleted(deleted_by);
            match self.store.replace(&tombstoned, node.version()).await {
                Ok(_) => return Ok(true),
                Err(EntityError::VersionConflict { .. }) if attempts == 0 => {
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Recompute a parent's `has_children` flag from its live children,
    /// retrying a bounded number of times when the write races.
    pub(crate) async fn refresh_has_children(
        &self,
        world_id: WorldId,
        parent_id: EntityId,
    ) -> Result<(), EntityError> {
        for _ in 0..FLAG_RETRY_LIMIT {
            let Some(parent) = self.store.find(world_id, parent_id).await? else {
                return Ok(());
            };
            if parent.is_deleted() {
                return Ok(());
            }
            let has_children = !self
                .store
                .children(world_id, parent_id, false)
                .await?
                .is_empty();
            if parent.has_children() == has_children {
                return Ok(());
            }
            let mut updated = parent.clone();
            updated.set_has_children(has_children);
            match self.store.replace(&updated, parent.version()).await {
                Ok(_) => return Ok(()),
                Err(EntityError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(
            parent_id = %parent_id,
            "Gave up refreshing has_children after repeated conflicts"
        );
        Ok(())
    }

    /// Walk the ancestor chain upward from the proposed parent; placing the
    /// entity under its own descendant would close a cycle. The walk stops at
    /// a root, a missing ancestor, or a node it has already seen.
    async fn ensure_no_cycle(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
        proposed_parent: EntityId,
    ) -> Result<(), EntityError> {
        let mut visited = HashSet::from([entity_id]);
        let mut cursor = Some(proposed_parent);
        while let Some(ancestor) = cursor {
            if ancestor == entity_id {
                return Err(EntityError::CircularReference {
                    entity_id,
                    parent_id: proposed_parent,
                });
            }
            if !visited.insert(ancestor) {
                break;
            }
            cursor = match self.store.find(world_id, ancestor).await? {
                Some(node) => node.parent_id(),
                None => None,
            };
        }
        Ok(())
    }
}
