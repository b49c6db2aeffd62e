//! In-memory delete-job queue
//!
//! Process-local transport for tests and single-node deployments. Failed
//! attempts are rescheduled with backoff until the job runs out of attempts,
//! then parked as dead for inspection.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::application::ports::outbound::{
    DeleteJob, DeleteJobQueuePort, QueueError, QueueNotifier, QueuedDeleteJob,
};
use crate::domain::value_objects::JobId;
use crate::infrastructure::queues::{retry_backoff, DEFAULT_MAX_JOB_ATTEMPTS};

struct PendingJob {
    id: JobId,
    job: DeleteJob,
    attempts: u32,
    available_at: DateTime<Utc>,
    enqueued_at: DateTime<Utc>,
}

struct InFlightJob {
    job: DeleteJob,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
}

struct DeadJob {
    #[allow(dead_code)]
    job: DeleteJob,
    died_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingJob>,
    processing: HashMap<JobId, InFlightJob>,
    dead: Vec<DeadJob>,
}

pub struct InMemoryDeleteJobQueue {
    state: Mutex<QueueState>,
    notifier: QueueNotifier,
    max_attempts: u32,
}

impl Default for InMemoryDeleteJobQueue {
    fn default() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_JOB_ATTEMPTS)
    }
}

impl InMemoryDeleteJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notifier: QueueNotifier::new(),
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl DeleteJobQueuePort for InMemoryDeleteJobQueue {
    async fn enqueue(&self, job: DeleteJob) -> Result<JobId, QueueError> {
        let id = JobId::new();
        let now = Utc::now();
        self.state.lock().await.pending.push(PendingJob {
            id,
            job,
            attempts: 0,
            available_at: now,
            enqueued_at: now,
        });
        self.notifier.notify_work();
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedDeleteJob>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let position = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.available_at <= now)
            .min_by_key(|(_, pending)| (pending.enqueued_at, pending.id))
            .map(|(position, _)| position);
        let Some(position) = position else {
            return Ok(None);
        };
        let pending = state.pending.swap_remove(position);
        let attempts = pending.attempts + 1;
        state.processing.insert(
            pending.id,
            InFlightJob {
                job: pending.job,
                attempts,
                enqueued_at: pending.enqueued_at,
            },
        );
        Ok(Some(QueuedDeleteJob {
            id: pending.id,
            job: pending.job,
            attempts,
        }))
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        self.state.lock().await.processing.remove(&id);
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(in_flight) = state.processing.remove(&id) else {
            return Ok(());
        };
        if in_flight.attempts >= self.max_attempts {
            tracing::warn!(
                job_id = %id,
                attempts = in_flight.attempts,
                "Delete job exhausted its attempts: {error}"
            );
            state.dead.push(DeadJob {
                job: in_flight.job,
                died_at: Utc::now(),
            });
        } else {
            state.pending.push(PendingJob {
                id,
                job: in_flight.job,
                attempts: in_flight.attempts,
                available_at: Utc::now() + retry_backoff(in_flight.attempts),
                enqueued_at: in_flight.enqueued_at,
            });
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn cleanup(&self, older_than: std::time::Duration) -> Result<usize, QueueError> {
        let cutoff = ChronoDuration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let mut state = self.state.lock().await;
        let before = state.dead.len();
        state.dead.retain(|dead| dead.died_at > cutoff);
        Ok(before - state.dead.len())
    }

    fn notifier(&self) -> QueueNotifier {
        self.notifier.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{DeleteOperationId, WorldId};

    fn job() -> DeleteJob {
        DeleteJob {
            world_id: WorldId::new(),
            operation_id: DeleteOperationId::new(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_complete() {
        let queue = InMemoryDeleteJobQueue::new();
        let job = job();
        queue.enqueue(job).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.job, job);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(queue.depth().await.unwrap(), 0);

        queue.complete(claimed.id).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_jobs_are_delivered_oldest_first() {
        let queue = InMemoryDeleteJobQueue::new();
        let first = job();
        let second = job();
        queue.enqueue(first).await.unwrap();
        queue.enqueue(second).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().job, first);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().job, second);
    }

    #[tokio::test]
    async fn test_failed_job_is_redelivered_after_backoff() {
        let queue = InMemoryDeleteJobQueue::new();
        queue.enqueue(job()).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        queue.fail(claimed.id, "store unreachable").await.unwrap();

        // Backed off, not yet available.
        assert!(queue.dequeue().await.unwrap().is_none());

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        let redelivered = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.id, claimed.id);
        assert_eq!(redelivered.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_parked_dead() {
        let queue = InMemoryDeleteJobQueue::with_max_attempts(1);
        queue.enqueue(job()).await.unwrap();

        let claimed = queue.dequeue().await.unwrap().unwrap();
        queue.fail(claimed.id, "permanent failure").await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.cleanup(std::time::Duration::ZERO).await.unwrap(), 1);
    }
}
