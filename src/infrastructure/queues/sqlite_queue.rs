//! SQLite-backed delete-job queue
//!
//! Durable transport: jobs survive process restarts, and because `process`
//! is idempotent a job that was claimed but never acknowledged can simply be
//! redelivered. The claim is a single atomic UPDATE so concurrent workers
//! never take the same job. The in-process notifier wakes local workers on
//! enqueue; workers on other processes fall back to the recovery interval.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::application::ports::outbound::{
    DeleteJob, DeleteJobQueuePort, QueueError, QueueNotifier, QueuedDeleteJob,
};
use crate::domain::value_objects::JobId;
use crate::infrastructure::queues::retry_backoff;

fn backend_err(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

pub struct SqliteDeleteJobQueue {
    pool: SqlitePool,
    notifier: QueueNotifier,
    max_attempts: u32,
}

impl SqliteDeleteJobQueue {
    pub async fn new(pool: SqlitePool, max_attempts: u32) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delete_jobs (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT,
                available_at_us INTEGER NOT NULL,
                created_at_us INTEGER NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_delete_jobs_ready
            ON delete_jobs (status, available_at_us, created_at_us)
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            notifier: QueueNotifier::new(),
            max_attempts: max_attempts.max(1),
        })
    }
}

#[async_trait]
impl DeleteJobQueuePort for SqliteDeleteJobQueue {
    async fn enqueue(&self, job: DeleteJob) -> Result<JobId, QueueError> {
        let id = JobId::new();
        let now_us = Utc::now().timestamp_micros();
        sqlx::query(
            r#"
            INSERT INTO delete_jobs
                (id, world_id, operation_id, status, attempts, available_at_us, created_at_us)
            VALUES (?, ?, ?, 'pending', 0, ?, ?)
        "#,
        )
        .bind(id.to_string())
        .bind(job.world_id.to_string())
        .bind(job.operation_id.to_string())
        .bind(now_us)
        .bind(now_us)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        self.notifier.notify_work();
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedDeleteJob>, QueueError> {
        let row: Option<(String, String, String, i64)> = sqlx::query_as(
            r#"
            UPDATE delete_jobs SET status = 'processing', attempts = attempts + 1
            WHERE id = (
                SELECT id FROM delete_jobs
                WHERE status = 'pending' AND available_at_us <= ?
                ORDER BY created_at_us, id
                LIMIT 1
            )
            RETURNING id, world_id, operation_id, attempts
        "#,
        )
        .bind(Utc::now().timestamp_micros())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        let Some((id, world_id, operation_id, attempts)) = row else {
            return Ok(None);
        };
        Ok(Some(QueuedDeleteJob {
            id: id
                .parse()
                .map_err(|e: uuid::Error| QueueError::Serialization(e.to_string()))?,
            job: DeleteJob {
                world_id: world_id
                    .parse()
                    .map_err(|e: uuid::Error| QueueError::Serialization(e.to_string()))?,
                operation_id: operation_id
                    .parse()
                    .map_err(|e: uuid::Error| QueueError::Serialization(e.to_string()))?,
            },
            attempts: attempts as u32,
        }))
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM delete_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        let attempts: Option<i64> =
            sqlx::query_scalar("SELECT attempts FROM delete_jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_err)?;
        let Some(attempts) = attempts else {
            return Ok(());
        };

        if attempts as u32 >= self.max_attempts {
            tracing::warn!(
                job_id = %id,
                attempts,
                "Delete job exhausted its attempts: {error}"
            );
            sqlx::query("UPDATE delete_jobs SET status = 'dead', last_error = ? WHERE id = ?")
                .bind(error)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
        } else {
            let available_at = Utc::now() + retry_backoff(attempts as u32);
            sqlx::query(
                r#"
                UPDATE delete_jobs
                SET status = 'pending', last_error = ?, available_at_us = ?
                WHERE id = ?
            "#,
            )
            .bind(error)
            .bind(available_at.timestamp_micros())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delete_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(backend_err)?;
        Ok(count as usize)
    }

    async fn cleanup(&self, older_than: std::time::Duration) -> Result<usize, QueueError> {
        let age_us = i64::try_from(older_than.as_micros()).unwrap_or(i64::MAX);
        let cutoff_us = Utc::now().timestamp_micros().saturating_sub(age_us);
        let result = sqlx::query(
            "DELETE FROM delete_jobs WHERE status = 'dead' AND created_at_us <= ?",
        )
        .bind(cutoff_us)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(result.rows_affected() as usize)
    }

    fn notifier(&self) -> QueueNotifier {
        self.notifier.clone()
    }
}
