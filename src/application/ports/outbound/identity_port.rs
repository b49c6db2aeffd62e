//! Identity and world-ownership ports
//!
//! Identity resolution and world ownership live outside this crate; the
//! services consume them through these two interfaces. A failure resolving
//! the caller short-circuits the operation as `Unauthorized`.

use async_trait::async_trait;

use crate::domain::errors::EntityError;
use crate::domain::value_objects::{UserId, WorldId};

#[async_trait]
pub trait IdentityPort: Send + Sync {
    /// Resolve the calling user.
    async fn current_user_id(&self) -> Result<UserId, EntityError>;
}

#[async_trait]
pub trait WorldDirectoryPort: Send + Sync {
    /// Owner of the given world, or `None` when the world does not exist.
    async fn world_owner(&self, world_id: WorldId) -> Result<Option<UserId>, EntityError>;
}
