//! Outbound ports - Interfaces that the application requires from external systems

mod entity_store_port;
mod identity_port;
mod job_queue_port;
mod operation_store_port;

pub use entity_store_port::{EntityPage, EntityQuery, EntityStorePort, ParentFilter};
pub use identity_port::{IdentityPort, WorldDirectoryPort};
pub use job_queue_port::{
    DeleteJob, DeleteJobQueuePort, QueueError, QueueNotifier, QueuedDeleteJob,
};
pub use operation_store_port::DeleteOperationStorePort;
