//! Background workers for the cascade-delete engine
//!
//! The delete worker drains the job queue and drives `process`; because
//! `process` is idempotent, a job may be retried or redelivered freely. The
//! maintenance worker sweeps expired operation records and dead jobs.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::outbound::{DeleteJobQueuePort, DeleteOperationStorePort};
use crate::application::services::CascadeDeleteService;

/// How long dead jobs stay around for inspection before the maintenance
/// sweep removes them.
const DEAD_JOB_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Worker that claims delete jobs and processes their operations
pub async fn delete_operation_worker(
    service: Arc<CascadeDeleteService>,
    queue: Arc<dyn DeleteJobQueuePort>,
    recovery_interval: Duration,
) {
    tracing::info!("Starting delete operation worker");
    let notifier = queue.notifier();
    loop {
        match queue.dequeue().await {
            Ok(Some(claimed)) => {
                match service
                    .process(claimed.job.world_id, claimed.job.operation_id)
                    .await
                {
                    Ok(operation) => {
                        tracing::debug!(
                            operation_id = %operation.id(),
                            status = %operation.status(),
                            "Processed delete operation"
                        );
                        if let Err(e) = queue.complete(claimed.id).await {
                            tracing::error!("Failed to acknowledge delete job: {}", e);
                        }
                    }
                    Err(e) if e.is_transient() => {
                        tracing::error!(
                            operation_id = %claimed.job.operation_id,
                            attempt = claimed.attempts,
                            "Failed to process delete operation: {}",
                            e
                        );
                        if let Err(qe) = queue.fail(claimed.id, &e.to_string()).await {
                            tracing::error!("Failed to reschedule delete job: {}", qe);
                        }
                    }
                    Err(e) => {
                        // Retrying cannot fix a permanent error; drop the job
                        // rather than burn its remaining attempts.
                        tracing::error!(
                            operation_id = %claimed.job.operation_id,
                            "Giving up on delete operation: {}",
                            e
                        );
                        if let Err(qe) = queue.complete(claimed.id).await {
                            tracing::error!("Failed to acknowledge delete job: {}", qe);
                        }
                    }
                }
            }
            Ok(None) => {
                // Queue empty - wait for notification or recovery timeout
                let _ = notifier.wait_for_work(recovery_interval).await;
            }
            Err(e) => {
                tracing::error!("Error claiming delete job: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Worker that reaps expired operation records and dead jobs on an interval
pub async fn maintenance_worker(
    operations: Arc<dyn DeleteOperationStorePort>,
    queue: Arc<dyn DeleteJobQueuePort>,
    interval: Duration,
) {
    tracing::info!("Starting store maintenance worker");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match operations.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::info!("Purged {} expired delete operations", purged),
            Err(e) => tracing::warn!("Failed to purge expired delete operations: {}", e),
        }
        match queue.cleanup(DEAD_JOB_RETENTION).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {} dead delete jobs", removed),
            Err(e) => tracing::warn!("Failed to clean up dead delete jobs: {}", e),
        }
    }
}
