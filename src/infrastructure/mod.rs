//! Infrastructure layer - External adapters and implementations
//!
//! This layer contains:
//! - Persistence: document-store backends (SQLite, in-memory) behind the
//!   store ports
//! - Queues: delete-job queue backends behind the queue port
//! - Delete worker: background execution of cascade-delete operations
//! - Identity: adapters for the consumed identity/ownership interfaces
//! - Config: application configuration
//! - State: shared application state

pub mod config;
pub mod delete_worker;
pub mod identity;
pub mod persistence;
pub mod queues;
pub mod state;
