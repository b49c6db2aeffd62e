//! Identity adapters for the consumed identity and world-ownership ports
//!
//! Real identity resolution lives outside this crate. These adapters cover
//! the two deployments this crate ships in: a single-tenant worker process
//! (one fixed user owning every world) and embedders/tests that register
//! world ownership explicitly.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::ports::outbound::{IdentityPort, WorldDirectoryPort};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{UserId, WorldId};

/// Identity provider that always resolves to one configured user.
pub struct FixedIdentity {
    user_id: UserId,
}

impl FixedIdentity {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

#[async_trait]
impl IdentityPort for FixedIdentity {
    async fn current_user_id(&self) -> Result<UserId, EntityError> {
        Ok(self.user_id)
    }
}

/// World directory for single-tenant deployments: every world belongs to the
/// configured owner.
pub struct SingleOwnerDirectory {
    owner_id: UserId,
}

impl SingleOwnerDirectory {
    pub fn new(owner_id: UserId) -> Self {
        Self { owner_id }
    }
}

#[async_trait]
impl WorldDirectoryPort for SingleOwnerDirectory {
    async fn world_owner(&self, _world_id: WorldId) -> Result<Option<UserId>, EntityError> {
        Ok(Some(self.owner_id))
    }
}

/// Explicit world registry; unknown worlds resolve to no owner.
#[derive(Default)]
pub struct MappedWorldDirectory {
    worlds: RwLock<HashMap<WorldId, UserId>>,
}

impl MappedWorldDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, world_id: WorldId, owner_id: UserId) {
        self.worlds.write().await.insert(world_id, owner_id);
    }
}

#[async_trait]
impl WorldDirectoryPort for MappedWorldDirectory {
    async fn world_owner(&self, world_id: WorldId) -> Result<Option<UserId>, EntityError> {
        Ok(self.worlds.read().await.get(&world_id).copied())
    }
}
