//! Application services - Use case implementations over the outbound ports

mod cascade_delete_service;
mod entity_service;
mod schema_versions;

pub use cascade_delete_service::{CascadeDeleteService, DeleteConfig};
pub use entity_service::{
    CreateEntityRequest, EntityService, UpdateEntityRequest, LIST_LIMIT_MAX,
};
pub use schema_versions::SchemaVersions;
