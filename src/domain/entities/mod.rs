//! Domain entities - Core business objects with identity

mod delete_operation;
mod world_entity;

pub use delete_operation::{
    DeleteOperation, DeleteOperationStatus, DEFAULT_OPERATION_TTL_SECONDS, MAX_RECORDED_FAILURES,
};
pub use world_entity::{
    EntityKind, WorldEntity, MAX_ATTRIBUTES_BYTES, MAX_DEPTH, MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
    MAX_TAGS, MAX_TAG_LEN,
};
