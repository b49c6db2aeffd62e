//! Delete-job queue port - message transport for cascade-delete work
//!
//! `initiate` enqueues an operation id; a background worker dequeues it and
//! drives `process`. Keeping the hand-off in a queue (rather than in-process
//! fire-and-forget) lets a scheduler retry `process` after restarts without
//! losing work - `process` is idempotent, so redelivery is safe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::value_objects::{DeleteOperationId, JobId, WorldId};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Queue serialization error: {0}")]
    Serialization(String),
}

/// Payload carried through the queue: which operation to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteJob {
    pub world_id: WorldId,
    pub operation_id: DeleteOperationId,
}

/// A claimed job. `attempts` counts deliveries including this one.
#[derive(Debug, Clone)]
pub struct QueuedDeleteJob {
    pub id: JobId,
    pub job: DeleteJob,
    pub attempts: u32,
}

#[async_trait]
pub trait DeleteJobQueuePort: Send + Sync {
    /// Add a job; wakes any worker blocked in `wait_for_work`.
    async fn enqueue(&self, job: DeleteJob) -> Result<JobId, QueueError>;

    /// Claim the oldest available job, marking it in flight. Returns `None`
    /// when nothing is ready.
    async fn dequeue(&self) -> Result<Option<QueuedDeleteJob>, QueueError>;

    /// Acknowledge a claimed job; it will not be delivered again.
    async fn complete(&self, id: JobId) -> Result<(), QueueError>;

    /// Report a failed attempt. The job is rescheduled with backoff until it
    /// runs out of attempts, then parked as dead for inspection.
    async fn fail(&self, id: JobId, error: &str) -> Result<(), QueueError>;

    /// Number of jobs waiting to be claimed.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Drop dead jobs older than the given age. Returns how many were
    /// removed.
    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError>;

    fn notifier(&self) -> QueueNotifier;
}

/// Wake-up channel between enqueuers and workers. Workers block on
/// `wait_for_work` with a recovery interval so missed notifications only
/// delay, never strand, a job.
#[derive(Debug, Clone, Default)]
pub struct QueueNotifier {
    notify: Arc<Notify>,
}

impl QueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_work(&self) {
        self.notify.notify_one();
    }

    /// Wait until notified or until the recovery interval elapses. Returns
    /// true when woken by a notification.
    pub async fn wait_for_work(&self, recovery_interval: Duration) -> bool {
        tokio::time::timeout(recovery_interval, self.notify.notified())
            .await
            .is_ok()
    }
}
