//! PostgreSQL task store.
//!
//! Claims run in a single transaction: rows are selected with
//! `FOR UPDATE SKIP LOCKED` and updated before commit, so two workers can
//! never pick the same row and never block on each other's batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use relay_common::types::{NewTask, NotificationTask, TaskStatus};

use super::{
    Completion, FailOutcome, FailureKind, FailurePlan, StoreError, TaskStore, plan_failure,
    to_chrono, validate_new_task,
};
use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, backoff: Backoff) -> Self {
        Self::with_clock(pool, backoff, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, backoff: Backoff, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            backoff,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn enqueue(
        &self,
        task: &NewTask,
        max_attempts: i32,
    ) -> Result<NotificationTask, StoreError> {
        validate_new_task(task, max_attempts)?;
        let now = self.clock.now();

        let row: NotificationTask = sqlx::query_as(
            r#"
            INSERT INTO notification_queue
                (id, task_type, payload, source_table, source_id, status,
                 attempt_count, max_attempts, next_visible_at, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&task.task_type)
        .bind(&task.payload)
        .bind(task.source_ref.as_ref().map(|s| s.table.as_str()))
        .bind(task.source_ref.as_ref().map(|s| s.id.as_str()))
        .bind(max_attempts)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            task_id = %row.id,
            task_type = %row.task_type,
            max_attempts,
            "Notification task enqueued"
        );

        Ok(row)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: u32,
        lease: Duration,
    ) -> Result<Vec<NotificationTask>, StoreError> {
        let now = self.clock.now();
        let lease_expires_at = now + to_chrono(lease);

        let mut tx = self.pool.begin().await?;

        // A stale claim on the final attempt cannot be retried: bury it.
        let buried: Vec<(Uuid, i32, Option<String>)> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'dead',
                last_error = 'lease expired during final attempt (worker '
                    || COALESCE(claimed_by, 'unknown') || ')',
                claimed_by = NULL,
                lease_expires_at = NULL
            WHERE status = 'claimed'
              AND lease_expires_at < $1
              AND attempt_count >= max_attempts
            RETURNING id, attempt_count, last_error
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        for (id, attempt_count, last_error) in &buried {
            tracing::error!(
                task_id = %id,
                attempt_count,
                last_error = last_error.as_deref().unwrap_or_default(),
                "Task dead after its final lease expired"
            );
        }

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM notification_queue
            WHERE attempt_count < max_attempts
              AND (
                    (status IN ('pending', 'failed_retryable') AND next_visible_at <= $1)
                 OR (status = 'claimed' AND lease_expires_at < $1)
              )
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(i64::from(batch_size))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let mut claimed: Vec<NotificationTask> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'claimed',
                claimed_by = $2,
                claimed_at = $3,
                lease_expires_at = $4,
                attempt_count = attempt_count + 1
            WHERE id = ANY($1)
            RETURNING *
            "#,
        )
        .bind(&ids)
        .bind(worker_id)
        .bind(now)
        .bind(lease_expires_at)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        claimed.sort_by_key(|t| (t.created_at, t.id));
        tracing::debug!(worker_id, claimed = claimed.len(), "Claimed notification tasks");
        Ok(claimed)
    }

    async fn complete(&self, task_id: Uuid) -> Result<Completion, StoreError> {
        let now = self.clock.now();

        let updated = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'completed',
                completed_at = $2,
                claimed_by = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND status = 'claimed'
            "#,
        )
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(Completion::Completed);
        }

        let status: Option<TaskStatus> =
            sqlx::query_scalar("SELECT status FROM notification_queue WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some(TaskStatus::Completed) => Ok(Completion::AlreadyCompleted),
            Some(status) => Err(StoreError::InvalidTransition {
                id: task_id,
                status,
            }),
            None => Err(StoreError::NotFound(task_id)),
        }
    }

    async fn fail(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error: &str,
        kind: FailureKind,
    ) -> Result<FailOutcome, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let row: Option<(TaskStatus, Option<String>, i32, i32)> = sqlx::query_as(
            r#"
            SELECT status, claimed_by, attempt_count, max_attempts
            FROM notification_queue
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, claimed_by, attempt_count, max_attempts)) = row else {
            return Err(StoreError::NotFound(task_id));
        };

        if status != TaskStatus::Claimed || claimed_by.as_deref() != Some(worker_id) {
            tx.rollback().await?;
            return Ok(FailOutcome::LeaseLost);
        }

        let outcome = match plan_failure(attempt_count, max_attempts, kind, now, &self.backoff) {
            FailurePlan::Dead => {
                sqlx::query(
                    r#"
                    UPDATE notification_queue
                    SET status = 'dead',
                        last_error = $2,
                        claimed_by = NULL,
                        lease_expires_at = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(task_id)
                .bind(error)
                .execute(&mut *tx)
                .await?;
                FailOutcome::Dead
            }
            FailurePlan::Retry { next_visible_at } => {
                sqlx::query(
                    r#"
                    UPDATE notification_queue
                    SET status = 'failed_retryable',
                        last_error = $2,
                        next_visible_at = $3,
                        claimed_by = NULL,
                        lease_expires_at = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(task_id)
                .bind(error)
                .bind(next_visible_at)
                .execute(&mut *tx)
                .await?;
                FailOutcome::Retrying { next_visible_at }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();

        let released = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = CASE WHEN last_error IS NULL THEN 'pending' ELSE 'failed_retryable' END,
                attempt_count = GREATEST(attempt_count - 1, 0),
                claimed_by = NULL,
                lease_expires_at = NULL,
                next_visible_at = $3
            WHERE id = $1 AND status = 'claimed' AND claimed_by = $2
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if released.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM notification_queue WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(task_id)),
        }
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<NotificationTask>, StoreError> {
        let task = sqlx::query_as("SELECT * FROM notification_queue WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<NotificationTask>, StoreError> {
        let tasks = sqlx::query_as(
            r#"
            SELECT * FROM notification_queue
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}
