//! Schema version gate - lazy migration policy for entity attributes
//!
//! Each entity kind has a current attribute-schema version. Writes that do
//! not name a version are stamped with the current one, so documents migrate
//! forward the next time they are written instead of in a bulk rewrite.
//! Reads never migrate. Downgrades are rejected outright.

use std::collections::HashMap;

use crate::domain::entities::EntityKind;
use crate::domain::errors::EntityError;

/// Current attribute-schema version per kind.
const CURRENT_VERSIONS: [(EntityKind, u32); 6] = [
    (EntityKind::Character, 2),
    (EntityKind::Location, 2),
    (EntityKind::Item, 1),
    (EntityKind::Faction, 1),
    (EntityKind::Event, 1),
    (EntityKind::Note, 1),
];

#[derive(Debug, Clone)]
pub struct SchemaVersions {
    current: HashMap<EntityKind, u32>,
}

impl Default for SchemaVersions {
    fn default() -> Self {
        Self {
            current: CURRENT_VERSIONS.into_iter().collect(),
        }
    }
}

impl SchemaVersions {
    /// Override the current version for a kind. Embedders register their own
    /// schema revisions here.
    pub fn with_current(mut self, kind: EntityKind, version: u32) -> Self {
        self.current.insert(kind, version);
        self
    }

    pub fn current_for(&self, kind: EntityKind) -> u32 {
        self.current.get(&kind).copied().unwrap_or(1)
    }

    /// Decide the version to stamp on a write.
    ///
    /// Without an explicit request the entity moves to the current version -
    /// but never below what is already stored, so a document written by a
    /// newer deployment is not silently downgraded by an older one.
    pub fn stamp_for_write(
        &self,
        kind: EntityKind,
        requested: Option<u32>,
        stored: Option<u32>,
    ) -> Result<u32, EntityError> {
        let target = match requested {
            Some(version) => {
                if version == 0 {
                    return Err(EntityError::Validation(
                        "Schema version must be at least 1".to_string(),
                    ));
                }
                if let Some(stored) = stored {
                    if version < stored {
                        return Err(EntityError::SchemaDowngrade {
                            stored,
                            requested: version,
                        });
                    }
                }
                version
            }
            None => self.current_for(kind).max(stored.unwrap_or(1)),
        };
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstated_version_stamps_current() {
        let versions = SchemaVersions::default();
        let stamped = versions
            .stamp_for_write(EntityKind::Character, None, None)
            .unwrap();
        assert_eq!(stamped, versions.current_for(EntityKind::Character));
    }

    #[test]
    fn test_unstated_version_never_downgrades_stored() {
        let versions = SchemaVersions::default();
        let current = versions.current_for(EntityKind::Item);
        let stamped = versions
            .stamp_for_write(EntityKind::Item, None, Some(current + 5))
            .unwrap();
        assert_eq!(stamped, current + 5);
    }

    #[test]
    fn test_explicit_downgrade_is_rejected() {
        let versions = SchemaVersions::default();
        let result = versions.stamp_for_write(EntityKind::Location, Some(1), Some(2));
        assert!(matches!(
            result,
            Err(EntityError::SchemaDowngrade {
                stored: 2,
                requested: 1
            })
        ));
    }

    #[test]
    fn test_zero_version_is_rejected() {
        let versions = SchemaVersions::default();
        assert!(versions
            .stamp_for_write(EntityKind::Note, Some(0), None)
            .is_err());
    }

    #[test]
    fn test_override_registers_new_current() {
        let versions = SchemaVersions::default().with_current(EntityKind::Note, 7);
        assert_eq!(versions.current_for(EntityKind::Note), 7);
    }
}
