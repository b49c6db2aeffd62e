//! Delete operation - audit and progress record for cascade deletes
//!
//! One record per delete request. The orchestrator owns the record: it is
//! created `Pending`, moves to `InProgress` once the subtree has been sized,
//! and reaches exactly one terminal state. Terminal records are frozen; a
//! resumed run that finds one returns it untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::WorldEntity;
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{DeleteOperationId, EntityId, UserId, VersionToken, WorldId};

/// Default retention window for operation records: 24 hours.
pub const DEFAULT_OPERATION_TTL_SECONDS: u64 = 86_400;

/// Cap on the failed-id list so a huge broken subtree cannot bloat the record.
pub const MAX_RECORDED_FAILURES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOperationStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl DeleteOperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeleteOperationStatus::Completed
                | DeleteOperationStatus::Partial
                | DeleteOperationStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteOperationStatus::Pending => "pending",
            DeleteOperationStatus::InProgress => "in_progress",
            DeleteOperationStatus::Completed => "completed",
            DeleteOperationStatus::Partial => "partial",
            DeleteOperationStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeleteOperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one cascade-delete request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOperation {
    id: DeleteOperationId,
    world_id: WorldId,
    root_entity_id: EntityId,
    /// Denormalized for display; the root may be gone by the time a caller
    /// polls.
    root_entity_name: String,
    status: DeleteOperationStatus,
    total_entities: u64,
    deleted_count: u64,
    failed_count: u64,
    failed_entity_ids: Vec<EntityId>,
    cascade: bool,
    created_by: UserId,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_details: Option<String>,
    /// Retention window; the storage layer reaps expired records.
    ttl_seconds: u64,
    version: Option<VersionToken>,
}

impl DeleteOperation {
    pub fn new(root: &WorldEntity, cascade: bool, created_by: UserId, ttl_seconds: u64) -> Self {
        Self {
            id: DeleteOperationId::new(),
            world_id: root.world_id(),
            root_entity_id: root.id(),
            root_entity_name: root.name().to_string(),
            status: DeleteOperationStatus::Pending,
            total_entities: 0,
            deleted_count: 0,
            failed_count: 0,
            failed_entity_ids: Vec::new(),
            cascade,
            created_by,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_details: None,
            ttl_seconds,
            version: None,
        }
    }

    /// Move to `InProgress` with the discovered subtree size. A no-op on a
    /// record that is already `InProgress` so a resumed run keeps its counts.
    pub fn begin(&mut self, total_entities: u64) -> Result<(), EntityError> {
        match self.status {
            DeleteOperationStatus::Pending => {
                self.status = DeleteOperationStatus::InProgress;
                self.total_entities = total_entities;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            DeleteOperationStatus::InProgress => Ok(()),
            terminal => Err(EntityError::Validation(format!(
                "Delete operation {} is already {terminal}",
                self.id
            ))),
        }
    }

    pub fn record_deleted(&mut self, count: u64) {
        self.deleted_count += count;
    }

    /// Record a per-node failure without aborting the run. The id list is
    /// bounded; the count is not.
    pub fn record_failure(&mut self, entity_id: EntityId) {
        self.failed_count += 1;
        if self.failed_entity_ids.len() < MAX_RECORDED_FAILURES {
            self.failed_entity_ids.push(entity_id);
        }
    }

    /// Compute the terminal status from the final counts and stamp
    /// `completed_at`. Exactly one terminal transition is allowed.
    pub fn finish(&mut self) -> Result<(), EntityError> {
        if self.status != DeleteOperationStatus::InProgress {
            return Err(EntityError::Validation(format!(
                "Delete operation {} cannot finish from status {}",
                self.id, self.status
            )));
        }
        self.status = if self.failed_count == 0 {
            DeleteOperationStatus::Completed
        } else if self.failed_count >= self.total_entities {
            DeleteOperationStatus::Failed
        } else {
            DeleteOperationStatus::Partial
        };
        if self.failed_count > 0 {
            self.error_details = Some(format!(
                "{} of {} entities failed to delete",
                self.failed_count, self.total_entities
            ));
        }
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Abort into `Failed` with the given detail, e.g. when the root entity
    /// no longer exists.
    pub fn fail_with(&mut self, details: impl Into<String>) -> Result<(), EntityError> {
        if self.status.is_terminal() {
            return Err(EntityError::Validation(format!(
                "Delete operation {} is already {}",
                self.id, self.status
            )));
        }
        self.status = DeleteOperationStatus::Failed;
        self.error_details = Some(details.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Instant after which the storage layer may reap this record.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_seconds as i64)
    }

    pub(crate) fn set_version(&mut self, version: VersionToken) {
        self.version = Some(version);
    }

    pub fn id(&self) -> DeleteOperationId {
        self.id
    }

    pub fn world_id(&self) -> WorldId {
        self.world_id
    }

    pub fn root_entity_id(&self) -> EntityId {
        self.root_entity_id
    }

    pub fn root_entity_name(&self) -> &str {
        &self.root_entity_name
    }

    pub fn status(&self) -> DeleteOperationStatus {
        self.status
    }

    pub fn total_entities(&self) -> u64 {
        self.total_entities
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn failed_entity_ids(&self) -> &[EntityId] {
        &self.failed_entity_ids
    }

    pub fn cascade(&self) -> bool {
        self.cascade
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_details(&self) -> Option<&str> {
        self.error_details.as_deref()
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn version(&self) -> Option<&VersionToken> {
        self.version.as_ref()
    }
}
