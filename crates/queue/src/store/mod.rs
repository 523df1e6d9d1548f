//! Task store contract and the pieces shared by its implementations.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use relay_common::error::AppError;
use relay_common::types::{NewTask, NotificationTask, TaskStatus};

use crate::backoff::Backoff;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Task {id} cannot be completed from status {status}")]
    InvalidTransition { id: Uuid, status: TaskStatus },

    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Task store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::NotFound(id) => AppError::NotFound(format!("Task {} not found", id)),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Result of [`TaskStore::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    /// The task was already completed; the call changed nothing.
    AlreadyCompleted,
}

/// How a delivery failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying after backoff.
    Transient,
    /// Retrying cannot help; go straight to `dead`.
    Permanent,
}

/// Result of [`TaskStore::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { next_visible_at: DateTime<Utc> },
    Dead,
    /// The caller no longer holds the claim (another worker reclaimed the task
    /// or it already reached a terminal state). Nothing was written.
    LeaseLost,
}

/// Durable queue of notification tasks.
///
/// `claim_batch`, `complete` and `fail` must each be atomic against any number
/// of concurrent callers, including callers in other processes.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new `pending` task.
    async fn enqueue(
        &self,
        task: &NewTask,
        max_attempts: i32,
    ) -> Result<NotificationTask, StoreError>;

    /// Claim up to `batch_size` claimable tasks for `worker_id`.
    ///
    /// Claimable means pending or retryable with `next_visible_at <= now`, or
    /// claimed with `lease_expires_at < now`. Claiming increments
    /// `attempt_count` and sets a lease of `lease`. Stale claims whose attempt
    /// budget is already spent are moved to `dead` instead of being reclaimed.
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: u32,
        lease: Duration,
    ) -> Result<Vec<NotificationTask>, StoreError>;

    /// Mark a claimed task completed. Repeating the call is harmless.
    async fn complete(&self, task_id: Uuid) -> Result<Completion, StoreError>;

    /// Record a failed attempt by the claim holder `worker_id`.
    async fn fail(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error: &str,
        kind: FailureKind,
    ) -> Result<FailOutcome, StoreError>;

    /// Hand back a claim that was never attempted.
    ///
    /// Undoes the claim's `attempt_count` increment and makes the task
    /// claimable again right away. Returns `false` when `worker_id` no longer
    /// holds the claim; nothing is written in that case.
    async fn release(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError>;

    async fn get(&self, task_id: Uuid) -> Result<Option<NotificationTask>, StoreError>;

    /// Tasks in `status`, newest first.
    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<NotificationTask>, StoreError>;
}

/// Target state computed for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailurePlan {
    Retry { next_visible_at: DateTime<Utc> },
    Dead,
}

pub(crate) fn plan_failure(
    attempt_count: i32,
    max_attempts: i32,
    kind: FailureKind,
    now: DateTime<Utc>,
    backoff: &Backoff,
) -> FailurePlan {
    if kind == FailureKind::Permanent || attempt_count >= max_attempts {
        return FailurePlan::Dead;
    }
    FailurePlan::Retry {
        next_visible_at: now + to_chrono(backoff.delay(attempt_count)),
    }
}

pub(crate) fn validate_new_task(task: &NewTask, max_attempts: i32) -> Result<(), StoreError> {
    if task.task_type.trim().is_empty() {
        return Err(StoreError::Invalid("task_type must not be empty".to_string()));
    }
    if max_attempts < 1 {
        return Err(StoreError::Invalid(format!(
            "max_attempts must be at least 1, got {}",
            max_attempts
        )));
    }
    Ok(())
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Error text stored when a final attempt's lease runs out.
pub(crate) fn lease_expired_message(worker_id: Option<&str>) -> String {
    format!(
        "lease expired during final attempt (worker {})",
        worker_id.unwrap_or("unknown")
    )
}
