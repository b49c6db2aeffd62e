//! World entity - a content node in a world's hierarchy
//!
//! Entities form a tree within their world - a Region contains a City, the
//! City contains a Tavern. `parent_id` establishes the containment
//! relationship; `path` and `depth` are denormalized from the parent chain at
//! write time so reads never walk ancestors.
//!
//! Fields are private and every mutation goes through a validating method:
//! an entity value in hand always satisfies the hierarchy and content bounds.
//! Writes replace the stored snapshot wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::EntityError;
use crate::domain::value_objects::{EntityId, UserId, VersionToken, WorldId};

/// Maximum depth of the hierarchy. Roots sit at depth 0.
pub const MAX_DEPTH: u32 = 10;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_TAGS: usize = 32;
pub const MAX_TAG_LEN: usize = 64;
pub const MAX_ATTRIBUTES_BYTES: usize = 32 * 1024;

/// The kind of content node. Closed set: used for validation and display,
/// never for tree legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Location,
    Item,
    Faction,
    Event,
    Note,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Location => "location",
            EntityKind::Item => "item",
            EntityKind::Faction => "faction",
            EntityKind::Event => "event",
            EntityKind::Note => "note",
        }
    }

    pub const ALL: [EntityKind; 6] = [
        EntityKind::Character,
        EntityKind::Location,
        EntityKind::Item,
        EntityKind::Faction,
        EntityKind::Event,
        EntityKind::Note,
    ];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(EntityKind::Character),
            "location" => Ok(EntityKind::Location),
            "item" => Ok(EntityKind::Item),
            "faction" => Ok(EntityKind::Faction),
            "event" => Ok(EntityKind::Event),
            "note" => Ok(EntityKind::Note),
            other => Err(EntityError::Validation(format!(
                "Unknown entity kind: {other}"
            ))),
        }
    }
}

/// A content node in the world's hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEntity {
    id: EntityId,
    world_id: WorldId,
    parent_id: Option<EntityId>,
    /// Ancestor ids, root first. `path.len() == depth`.
    path: Vec<EntityId>,
    depth: u32,
    /// True iff at least one non-deleted child exists. Maintained on write,
    /// not recomputed per read.
    has_children: bool,
    kind: EntityKind,
    name: String,
    description: String,
    tags: Vec<String>,
    /// Kind-specific payload, opaque to the hierarchy.
    attributes: serde_json::Value,
    owner_id: UserId,
    schema_version: u32,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Store-assigned; `None` until the entity is first persisted.
    version: Option<VersionToken>,
}

impl WorldEntity {
    /// Create a new entity under `parent` (or as a root when `None`),
    /// computing `path` and `depth` from the parent snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        world_id: WorldId,
        parent: Option<&WorldEntity>,
        kind: EntityKind,
        name: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
        attributes: serde_json::Value,
        owner_id: UserId,
        schema_version: u32,
    ) -> Result<Self, EntityError> {
        let name = name.into();
        let description = description.into();
        Self::validate_name(&name)?;
        Self::validate_description(&description)?;
        Self::validate_tags(&tags)?;
        Self::validate_attributes(&attributes)?;
        if schema_version == 0 {
            return Err(EntityError::Validation(
                "Schema version must be at least 1".to_string(),
            ));
        }

        let (parent_id, path, depth) = Self::placement(world_id, parent)?;

        let now = Utc::now();
        Ok(Self {
            id: EntityId::new(),
            world_id,
            parent_id,
            path,
            depth,
            has_children: false,
            kind,
            name,
            description,
            tags,
            attributes,
            owner_id,
            schema_version,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
            version: None,
        })
    }

    /// Apply a content update. Only provided fields change; each is validated
    /// before anything is assigned.
    pub fn apply_content_update(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        tags: Option<Vec<String>>,
        attributes: Option<serde_json::Value>,
    ) -> Result<(), EntityError> {
        if let Some(ref name) = name {
            Self::validate_name(name)?;
        }
        if let Some(ref description) = description {
            Self::validate_description(description)?;
        }
        if let Some(ref tags) = tags {
            Self::validate_tags(tags)?;
        }
        if let Some(ref attributes) = attributes {
            Self::validate_attributes(attributes)?;
        }

        let mut changed = false;
        if let Some(name) = name {
            self.name = name;
            changed = true;
        }
        if let Some(description) = description {
            self.description = description;
            changed = true;
        }
        if let Some(tags) = tags {
            self.tags = tags;
            changed = true;
        }
        if let Some(attributes) = attributes {
            self.attributes = attributes;
            changed = true;
        }
        if changed {
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Re-parent this entity, recomputing its own `path` and `depth` from the
    /// new parent snapshot. Descendants keep their cached paths until they are
    /// next written. Cycle detection is the caller's responsibility - it needs
    /// the live ancestor chain.
    pub fn reparent(&mut self, parent: Option<&WorldEntity>) -> Result<(), EntityError> {
        let (parent_id, path, depth) = Self::placement(self.world_id, parent)?;
        self.parent_id = parent_id;
        self.path = path;
        self.depth = depth;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Soft-delete this entity. Returns false when it was already deleted so
    /// callers never double-count.
    pub fn mark_deleted(&mut self, deleted_by: UserId) -> bool {
        if self.is_deleted {
            return false;
        }
        self.is_deleted = true;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = Some(deleted_by);
        true
    }

    /// Maintain the denormalized children flag. Does not count as a content
    /// update.
    pub fn set_has_children(&mut self, has_children: bool) {
        self.has_children = has_children;
    }

    pub(crate) fn set_schema_version(&mut self, schema_version: u32) {
        self.schema_version = schema_version;
    }

    pub(crate) fn set_version(&mut self, version: VersionToken) {
        self.version = Some(version);
    }

    fn placement(
        world_id: WorldId,
        parent: Option<&WorldEntity>,
    ) -> Result<(Option<EntityId>, Vec<EntityId>, u32), EntityError> {
        match parent {
            None => Ok((None, Vec::new(), 0)),
            Some(parent) => {
                if parent.world_id != world_id {
                    return Err(EntityError::Validation(
                        "Parent entity must be in the same world".to_string(),
                    ));
                }
                if parent.is_deleted {
                    return Err(EntityError::ParentNotFound(parent.id));
                }
                let depth = parent.depth + 1;
                if depth > MAX_DEPTH {
                    return Err(EntityError::Validation(format!(
                        "Hierarchy cannot exceed depth {MAX_DEPTH}"
                    )));
                }
                let mut path = parent.path.clone();
                path.push(parent.id);
                Ok((Some(parent.id), path, depth))
            }
        }
    }

    fn validate_name(name: &str) -> Result<(), EntityError> {
        if name.trim().is_empty() {
            return Err(EntityError::Validation(
                "Entity name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EntityError::Validation(format!(
                "Entity name cannot exceed {MAX_NAME_LEN} characters"
            )));
        }
        Ok(())
    }

    fn validate_description(description: &str) -> Result<(), EntityError> {
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EntityError::Validation(format!(
                "Entity description cannot exceed {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(())
    }

    fn validate_tags(tags: &[String]) -> Result<(), EntityError> {
        if tags.len() > MAX_TAGS {
            return Err(EntityError::Validation(format!(
                "Entity cannot carry more than {MAX_TAGS} tags"
            )));
        }
        for tag in tags {
            if tag.trim().is_empty() {
                return Err(EntityError::Validation(
                    "Tags cannot be empty".to_string(),
                ));
            }
            if tag.len() > MAX_TAG_LEN {
                return Err(EntityError::Validation(format!(
                    "Tags cannot exceed {MAX_TAG_LEN} characters"
                )));
            }
        }
        Ok(())
    }

    fn validate_attributes(attributes: &serde_json::Value) -> Result<(), EntityError> {
        let size = serde_json::to_vec(attributes)
            .map_err(|e| EntityError::Serialization(e.to_string()))?
            .len();
        if size > MAX_ATTRIBUTES_BYTES {
            return Err(EntityError::Validation(format!(
                "Entity attributes cannot exceed {MAX_ATTRIBUTES_BYTES} bytes"
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn world_id(&self) -> WorldId {
        self.world_id
    }

    pub fn parent_id(&self) -> Option<EntityId> {
        self.parent_id
    }

    pub fn path(&self) -> &[EntityId] {
        &self.path
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn has_children(&self) -> bool {
        self.has_children
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn attributes(&self) -> &serde_json::Value {
        &self.attributes
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn deleted_by(&self) -> Option<UserId> {
        self.deleted_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Option<&VersionToken> {
        self.version.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(world_id: WorldId) -> WorldEntity {
        WorldEntity::create(
            world_id,
            None,
            EntityKind::Location,
            "Root",
            "",
            vec![],
            serde_json::json!({}),
            UserId::new(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_root_has_empty_path_and_zero_depth() {
        let entity = root(WorldId::new());
        assert_eq!(entity.depth(), 0);
        assert!(entity.path().is_empty());
        assert_eq!(entity.parent_id(), None);
        assert!(!entity.has_children());
    }

    #[test]
    fn test_child_path_extends_parent_path() {
        let world_id = WorldId::new();
        let parent = root(world_id);
        let child = WorldEntity::create(
            world_id,
            Some(&parent),
            EntityKind::Location,
            "Child",
            "",
            vec![],
            serde_json::json!({}),
            UserId::new(),
            1,
        )
        .unwrap();

        assert_eq!(child.depth(), parent.depth() + 1);
        assert_eq!(child.path(), &[parent.id()]);
        assert_eq!(child.parent_id(), Some(parent.id()));
    }

    #[test]
    fn test_create_rejects_invalid_content() {
        let world_id = WorldId::new();
        let owner = UserId::new();

        let empty_name = WorldEntity::create(
            world_id,
            None,
            EntityKind::Item,
            "  ",
            "",
            vec![],
            serde_json::json!({}),
            owner,
            1,
        );
        assert!(matches!(empty_name, Err(EntityError::Validation(_))));

        let long_name = WorldEntity::create(
            world_id,
            None,
            EntityKind::Item,
            "x".repeat(MAX_NAME_LEN + 1),
            "",
            vec![],
            serde_json::json!({}),
            owner,
            1,
        );
        assert!(matches!(long_name, Err(EntityError::Validation(_))));

        let too_many_tags = WorldEntity::create(
            world_id,
            None,
            EntityKind::Item,
            "Sword",
            "",
            (0..MAX_TAGS + 1).map(|i| format!("tag-{i}")).collect(),
            serde_json::json!({}),
            owner,
            1,
        );
        assert!(matches!(too_many_tags, Err(EntityError::Validation(_))));

        let zero_schema = WorldEntity::create(
            world_id,
            None,
            EntityKind::Item,
            "Sword",
            "",
            vec![],
            serde_json::json!({}),
            owner,
            0,
        );
        assert!(matches!(zero_schema, Err(EntityError::Validation(_))));
    }

    #[test]
    fn test_create_rejects_oversized_attributes() {
        let blob = "a".repeat(MAX_ATTRIBUTES_BYTES);
        let result = WorldEntity::create(
            WorldId::new(),
            None,
            EntityKind::Note,
            "Note",
            "",
            vec![],
            serde_json::json!({ "body": blob }),
            UserId::new(),
            1,
        );
        assert!(matches!(result, Err(EntityError::Validation(_))));
    }

    #[test]
    fn test_depth_bound_is_enforced() {
        let world_id = WorldId::new();
        let owner = UserId::new();
        let mut current = root(world_id);
        for i in 0..MAX_DEPTH {
            current = WorldEntity::create(
                world_id,
                Some(&current),
                EntityKind::Location,
                format!("Level {i}"),
                "",
                vec![],
                serde_json::json!({}),
                owner,
                1,
            )
            .unwrap();
        }
        assert_eq!(current.depth(), MAX_DEPTH);

        let too_deep = WorldEntity::create(
            world_id,
            Some(&current),
            EntityKind::Location,
            "Too deep",
            "",
            vec![],
            serde_json::json!({}),
            owner,
            1,
        );
        assert!(matches!(too_deep, Err(EntityError::Validation(_))));
    }

    #[test]
    fn test_create_under_deleted_parent_fails() {
        let world_id = WorldId::new();
        let mut parent = root(world_id);
        parent.mark_deleted(UserId::new());

        let result = WorldEntity::create(
            world_id,
            Some(&parent),
            EntityKind::Location,
            "Orphan",
            "",
            vec![],
            serde_json::json!({}),
            UserId::new(),
            1,
        );
        assert!(matches!(result, Err(EntityError::ParentNotFound(_))));
    }

    #[test]
    fn test_reparent_recomputes_own_path_only() {
        let world_id = WorldId::new();
        let owner = UserId::new();
        let a = root(world_id);
        let b = WorldEntity::create(
            world_id,
            Some(&a),
            EntityKind::Location,
            "B",
            "",
            vec![],
            serde_json::json!({}),
            owner,
            1,
        )
        .unwrap();
        let mut c = WorldEntity::create(
            world_id,
            Some(&b),
            EntityKind::Location,
            "C",
            "",
            vec![],
            serde_json::json!({}),
            owner,
            1,
        )
        .unwrap();
        assert_eq!(c.path(), &[a.id(), b.id()]);

        c.reparent(Some(&a)).unwrap();
        assert_eq!(c.path(), &[a.id()]);
        assert_eq!(c.depth(), 1);

        c.reparent(None).unwrap();
        assert!(c.path().is_empty());
        assert_eq!(c.depth(), 0);
    }

    #[test]
    fn test_mark_deleted_is_idempotent() {
        let mut entity = root(WorldId::new());
        let user = UserId::new();
        assert!(entity.mark_deleted(user));
        assert!(entity.is_deleted());
        assert_eq!(entity.deleted_by(), Some(user));
        assert!(entity.deleted_at().is_some());
        assert!(!entity.mark_deleted(user));
    }
}
