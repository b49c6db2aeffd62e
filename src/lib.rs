//! lorevault - hierarchical world-content store with asynchronous cascade delete
//!
//! lorevault keeps a tree of typed content nodes (characters, locations,
//! items, ...) scoped to an owning world:
//! - Denormalized hierarchy metadata (path, depth, has-children) maintained
//!   under create, move, and delete
//! - Optimistic concurrency via store-assigned version tokens
//! - Soft deletion with tombstones instead of physical removal
//! - Long-running, resumable, partially-failable cascade deletes tracked by
//!   auditable operation records and driven by background workers

pub mod application;
pub mod domain;
pub mod infrastructure;
