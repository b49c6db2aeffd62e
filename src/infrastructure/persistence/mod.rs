//! Persistence adapters - document store backends behind the store ports
//!
//! Two logical collections, entities and delete operations, both keyed by
//! the owning world as partition key. The SQLite backend is the durable
//! document store; the in-memory backend mirrors its semantics for tests and
//! embedders.

mod factory;
mod memory_store;
mod sqlite_store;

pub use factory::StoreFactory;
pub use memory_store::{InMemoryEntityStore, InMemoryOperationStore};
pub use sqlite_store::{SqliteEntityStore, SqliteOperationStore};
