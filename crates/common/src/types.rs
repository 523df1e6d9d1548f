use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task type emitted by parcel check-in.
pub const PARCEL_ARRIVED: &str = "parcel_arrived";

/// Lifecycle state of a queued notification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    FailedRetryable,
    Dead,
}

impl TaskStatus {
    /// Terminal states are never claimed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Dead)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Claimed => write!(f, "claimed"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::FailedRetryable => write!(f, "failed_retryable"),
            TaskStatus::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "claimed" => Ok(TaskStatus::Claimed),
            "completed" => Ok(TaskStatus::Completed),
            "failed_retryable" => Ok(TaskStatus::FailedRetryable),
            "dead" => Ok(TaskStatus::Dead),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Pointer to the business row a task notifies about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: String,
    pub id: String,
}

/// A row of the `notification_queue` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationTask {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub source_table: Option<String>,
    pub source_id: Option<String>,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NotificationTask {
    pub fn source_ref(&self) -> Option<SourceRef> {
        match (&self.source_table, &self.source_id) {
            (Some(table), Some(id)) => Some(SourceRef {
                table: table.clone(),
                id: id.clone(),
            }),
            _ => None,
        }
    }

    /// Whether the claim path may pick this task up at `now`.
    ///
    /// Pending and retryable tasks wait for `next_visible_at`; claimed tasks
    /// become reclaimable only once their lease has strictly expired.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending | TaskStatus::FailedRetryable => self.next_visible_at <= now,
            TaskStatus::Claimed => self.lease_expires_at.is_some_and(|lease| lease < now),
            TaskStatus::Completed | TaskStatus::Dead => false,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Insert request from an enqueuing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
    /// Overrides the per task type ceiling when set.
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            source_ref: None,
            max_attempts: None,
        }
    }

    pub fn with_source(mut self, table: impl Into<String>, id: impl Into<String>) -> Self {
        self.source_ref = Some(SourceRef {
            table: table.into(),
            id: id.into(),
        });
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Result of one task within a worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Delivered and marked complete.
    Completed,
    /// Delivery failed; the task will be retried after backoff.
    Retrying,
    /// Delivery failed and the task is now dead.
    Dead,
    /// Not attempted: too little lease was left to dispatch safely. The claim
    /// was handed back for the next invocation.
    Deferred,
    /// The store rejected the outcome report (lease lost or store error).
    Unreported,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Completed => write!(f, "completed"),
            OutcomeStatus::Retrying => write!(f, "retrying"),
            OutcomeStatus::Dead => write!(f, "dead"),
            OutcomeStatus::Deferred => write!(f, "deferred"),
            OutcomeStatus::Unreported => write!(f, "unreported"),
        }
    }
}

/// Per-task entry of an invocation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: Uuid,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub worker: String,
    pub processed: usize,
    pub results: Vec<TaskOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(status: TaskStatus) -> NotificationTask {
        let now = Utc::now();
        NotificationTask {
            id: Uuid::new_v4(),
            task_type: PARCEL_ARRIVED.to_string(),
            payload: serde_json::json!({}),
            source_table: None,
            source_id: None,
            status,
            attempt_count: 0,
            max_attempts: 5,
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            next_visible_at: now,
            last_error: None,
            created_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Claimed,
            TaskStatus::Completed,
            TaskStatus::FailedRetryable,
            TaskStatus::Dead,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("archived".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::FailedRetryable).unwrap();
        assert_eq!(json, "\"failed_retryable\"");
    }

    #[test]
    fn test_claimed_task_reclaimable_only_after_lease() {
        let now = Utc::now();
        let mut t = task(TaskStatus::Claimed);
        t.lease_expires_at = Some(now);
        assert!(!t.is_claimable_at(now));
        assert!(t.is_claimable_at(now + Duration::milliseconds(1)));
    }

    #[test]
    fn test_retryable_task_waits_for_visibility() {
        let now = Utc::now();
        let mut t = task(TaskStatus::FailedRetryable);
        t.next_visible_at = now + Duration::seconds(30);
        assert!(!t.is_claimable_at(now));
        assert!(t.is_claimable_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_terminal_tasks_never_claimable() {
        let later = Utc::now() + Duration::days(365);
        assert!(!task(TaskStatus::Completed).is_claimable_at(later));
        assert!(!task(TaskStatus::Dead).is_claimable_at(later));
    }

    #[test]
    fn test_source_ref_requires_both_parts() {
        let mut t = task(TaskStatus::Pending);
        t.source_table = Some("parcels".to_string());
        assert!(t.source_ref().is_none());
        t.source_id = Some("42".to_string());
        assert_eq!(
            t.source_ref(),
            Some(SourceRef {
                table: "parcels".to_string(),
                id: "42".to_string()
            })
        );
    }
}
