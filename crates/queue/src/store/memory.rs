//! In-process task store.
//!
//! Every operation runs under one async mutex, which makes claim/complete/fail
//! trivially atomic within the process. Used by tests and single-node setups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use relay_common::types::{NewTask, NotificationTask, TaskStatus};

use super::{
    Completion, FailOutcome, FailureKind, FailurePlan, StoreError, TaskStore,
    lease_expired_message, plan_failure, to_chrono, validate_new_task,
};
use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};

pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, NotificationTask>>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl MemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, backoff: Backoff) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            clock,
            backoff,
        }
    }

    /// Snapshot of every task, oldest first.
    pub async fn all(&self) -> Vec<NotificationTask> {
        let tasks = self.tasks.lock().await;
        let mut all: Vec<_> = tasks.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        all
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Backoff::default())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn enqueue(
        &self,
        task: &NewTask,
        max_attempts: i32,
    ) -> Result<NotificationTask, StoreError> {
        validate_new_task(task, max_attempts)?;
        let now = self.clock.now();
        let source = task.source_ref.clone();

        let row = NotificationTask {
            id: Uuid::new_v4(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            source_table: source.as_ref().map(|s| s.table.clone()),
            source_id: source.map(|s| s.id),
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts,
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            next_visible_at: now,
            last_error: None,
            created_at: now,
            completed_at: None,
        };

        self.tasks.lock().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: u32,
        lease: Duration,
    ) -> Result<Vec<NotificationTask>, StoreError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.lock().await;

        for task in tasks.values_mut() {
            if task.status == TaskStatus::Claimed
                && task.is_claimable_at(now)
                && task.attempts_exhausted()
            {
                task.last_error = Some(lease_expired_message(task.claimed_by.as_deref()));
                task.status = TaskStatus::Dead;
                task.claimed_by = None;
                task.lease_expires_at = None;
                tracing::error!(
                    task_id = %task.id,
                    attempt_count = task.attempt_count,
                    last_error = task.last_error.as_deref().unwrap_or_default(),
                    "Task dead after its final lease expired"
                );
            }
        }

        let mut candidates: Vec<&mut NotificationTask> = tasks
            .values_mut()
            .filter(|t| t.is_claimable_at(now) && !t.attempts_exhausted())
            .collect();
        candidates.sort_by_key(|t| (t.created_at, t.id));

        let lease_expires_at = now + to_chrono(lease);
        let claimed = candidates
            .into_iter()
            .take(batch_size as usize)
            .map(|task| {
                task.status = TaskStatus::Claimed;
                task.claimed_by = Some(worker_id.to_string());
                task.claimed_at = Some(now);
                task.lease_expires_at = Some(lease_expires_at);
                task.attempt_count += 1;
                task.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn complete(&self, task_id: Uuid) -> Result<Completion, StoreError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&task_id).ok_or(StoreError::NotFound(task_id))?;

        match task.status {
            TaskStatus::Claimed => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
                task.claimed_by = None;
                task.lease_expires_at = None;
                Ok(Completion::Completed)
            }
            TaskStatus::Completed => Ok(Completion::AlreadyCompleted),
            status => Err(StoreError::InvalidTransition {
                id: task_id,
                status,
            }),
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
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&task_id).ok_or(StoreError::NotFound(task_id))?;

        if task.status != TaskStatus::Claimed || task.claimed_by.as_deref() != Some(worker_id) {
            return Ok(FailOutcome::LeaseLost);
        }

        task.last_error = Some(error.to_string());
        task.claimed_by = None;
        task.lease_expires_at = None;

        match plan_failure(task.attempt_count, task.max_attempts, kind, now, &self.backoff) {
            FailurePlan::Dead => {
                task.status = TaskStatus::Dead;
                Ok(FailOutcome::Dead)
            }
            FailurePlan::Retry { next_visible_at } => {
                task.status = TaskStatus::FailedRetryable;
                task.next_visible_at = next_visible_at;
                Ok(FailOutcome::Retrying { next_visible_at })
            }
        }
    }

    async fn release(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&task_id).ok_or(StoreError::NotFound(task_id))?;

        if task.status != TaskStatus::Claimed || task.claimed_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        task.status = if task.last_error.is_some() {
            TaskStatus::FailedRetryable
        } else {
            TaskStatus::Pending
        };
        task.attempt_count = (task.attempt_count - 1).max(0);
        task.claimed_by = None;
        task.lease_expires_at = None;
        task.next_visible_at = now;
        Ok(true)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<NotificationTask>, StoreError> {
        Ok(self.tasks.lock().await.get(&task_id).cloned())
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<NotificationTask>, StoreError> {
        let tasks = self.tasks.lock().await;
        let mut matching: Vec<_> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    const LEASE: Duration = Duration::from_secs(300);

    fn store_with_clock() -> (Arc<MemoryTaskStore>, ManualClock) {
        let clock = ManualClock::default();
        let store = MemoryTaskStore::new(Arc::new(clock.clone()), Backoff::default());
        (Arc::new(store), clock)
    }

    fn parcel_task() -> NewTask {
        NewTask::new("parcel_arrived", serde_json::json!({"recipient_email": "j@x.com"}))
            .with_source("parcels", Uuid::new_v4().to_string())
    }

    #[tokio::test]
    async fn test_claim_marks_task_claimed() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();

        let claimed = store.claim_batch("worker-a", 10, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let c = &claimed[0];
        assert_eq!(c.id, task.id);
        assert_eq!(c.status, TaskStatus::Claimed);
        assert_eq!(c.attempt_count, 1);
        assert_eq!(c.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(c.claimed_at, Some(clock.now()));
        assert_eq!(c.lease_expires_at, Some(clock.now() + ChronoDuration::seconds(300)));
    }

    #[tokio::test]
    async fn test_claim_respects_batch_size_and_age_order() {
        let (store, clock) = store_with_clock();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.enqueue(&parcel_task(), 5).await.unwrap().id);
            clock.advance(ChronoDuration::seconds(1));
        }

        let first = store.claim_batch("w1", 2, LEASE).await.unwrap();
        let second = store.claim_batch("w2", 10, LEASE).await.unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), ids[..2]);
        assert_eq!(second.iter().map(|t| t.id).collect::<Vec<_>>(), ids[2..]);
        assert!(store.claim_batch("w3", 10, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_overlap() {
        let (store, _clock) = store_with_clock();
        for _ in 0..50 {
            store.enqueue(&parcel_task(), 5).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_batch(&format!("w{i}"), 4, LEASE).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for task in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(task.id), "task {} claimed twice", task.id);
            }
        }
        assert_eq!(total, 32);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable_strictly_after_expiry() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("crashed", 10, LEASE).await.unwrap();

        clock.advance(ChronoDuration::seconds(300));
        assert!(store.claim_batch("w2", 10, LEASE).await.unwrap().is_empty());

        clock.advance(ChronoDuration::milliseconds(1));
        let reclaimed = store.claim_batch("w2", 10, LEASE).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, task.id);
        assert_eq!(reclaimed[0].attempt_count, 2);
        assert_eq!(reclaimed[0].claimed_by.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_stale_final_attempt_goes_dead() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 1).await.unwrap();
        store.claim_batch("crashed", 10, LEASE).await.unwrap();

        clock.advance(ChronoDuration::seconds(301));
        assert!(store.claim_batch("w2", 10, LEASE).await.unwrap().is_empty());

        let dead = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::Dead);
        assert_eq!(dead.attempt_count, 1);
        assert!(dead.last_error.unwrap().contains("crashed"));
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (store, _clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("w", 10, LEASE).await.unwrap();

        assert_eq!(store.complete(task.id).await.unwrap(), Completion::Completed);
        assert_eq!(
            store.complete(task.id).await.unwrap(),
            Completion::AlreadyCompleted
        );

        let done = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.claimed_by.is_none());
    }

    #[tokio::test]
    async fn test_complete_pending_task_is_rejected() {
        let (store, _clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        let err = store.complete(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                status: TaskStatus::Pending,
                ..
            }
        ));
        assert!(matches!(
            store.complete(Uuid::new_v4()).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_fail_schedules_retry_with_growing_backoff() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();

        let mut previous = None;
        for _ in 0..4 {
            clock.advance(ChronoDuration::hours(2));
            let claimed = store.claim_batch("w", 10, LEASE).await.unwrap();
            assert_eq!(claimed.len(), 1);

            let outcome = store
                .fail(task.id, "w", "resend 503", FailureKind::Transient)
                .await
                .unwrap();
            let FailOutcome::Retrying { next_visible_at } = outcome else {
                panic!("expected retry, got {outcome:?}");
            };
            let delay = next_visible_at - clock.now();
            if let Some(prev) = previous {
                assert!(delay > prev, "{delay:?} <= {prev:?}");
            }
            previous = Some(delay);

            let row = store.get(task.id).await.unwrap().unwrap();
            assert_eq!(row.status, TaskStatus::FailedRetryable);
            assert_eq!(row.last_error.as_deref(), Some("resend 503"));
            assert!(row.claimed_by.is_none());
        }
    }

    #[tokio::test]
    async fn test_retry_not_visible_before_backoff_elapses() {
        let clock = ManualClock::default();
        let store = MemoryTaskStore::new(Arc::new(clock.clone()), Backoff::default().without_jitter());
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("w", 10, LEASE).await.unwrap();
        store
            .fail(task.id, "w", "timeout", FailureKind::Transient)
            .await
            .unwrap();

        // attempt 1 -> 30s * 2^1
        clock.advance(ChronoDuration::seconds(59));
        assert!(store.claim_batch("w", 10, LEASE).await.unwrap().is_empty());
        clock.advance(ChronoDuration::seconds(1));
        assert_eq!(store.claim_batch("w", 10, LEASE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_ceiling_goes_dead_and_stays_unclaimed() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 3).await.unwrap();

        let mut last = None;
        for _ in 0..3 {
            let claimed = store.claim_batch("w", 10, LEASE).await.unwrap();
            assert_eq!(claimed.len(), 1);
            last = Some(
                store
                    .fail(task.id, "w", "smtp down", FailureKind::Transient)
                    .await
                    .unwrap(),
            );
            clock.advance(ChronoDuration::hours(2));
        }
        assert_eq!(last, Some(FailOutcome::Dead));

        clock.advance(ChronoDuration::days(30));
        assert!(store.claim_batch("w", 10, LEASE).await.unwrap().is_empty());
        let row = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Dead);
        assert_eq!(row.attempt_count, 3);
        assert_eq!(row.last_error.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retry_budget() {
        let (store, _clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("w", 10, LEASE).await.unwrap();
        let outcome = store
            .fail(task.id, "w", "no contact info", FailureKind::Permanent)
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Dead);
        assert_eq!(store.get(task.id).await.unwrap().unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_fail_from_stale_worker_is_ignored() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("slow", 10, LEASE).await.unwrap();
        clock.advance(ChronoDuration::seconds(301));
        store.claim_batch("fresh", 10, LEASE).await.unwrap();

        let outcome = store
            .fail(task.id, "slow", "late timeout", FailureKind::Transient)
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::LeaseLost);
        let row = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Claimed);
        assert_eq!(row.claimed_by.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_release_returns_unattempted_claim() {
        let (store, _clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 1).await.unwrap();
        store.claim_batch("w", 10, LEASE).await.unwrap();

        assert!(store.release(task.id, "w").await.unwrap());
        let row = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Pending);
        assert_eq!(row.attempt_count, 0);
        assert!(row.claimed_by.is_none());

        // The single attempt is still available.
        let again = store.claim_batch("w2", 10, LEASE).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_release_keeps_retry_state() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("w", 10, LEASE).await.unwrap();
        store
            .fail(task.id, "w", "503", FailureKind::Transient)
            .await
            .unwrap();
        clock.advance(ChronoDuration::hours(1));
        store.claim_batch("w", 10, LEASE).await.unwrap();

        assert!(store.release(task.id, "w").await.unwrap());
        let row = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::FailedRetryable);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("503"));
    }

    #[tokio::test]
    async fn test_release_by_stale_worker_is_ignored() {
        let (store, clock) = store_with_clock();
        let task = store.enqueue(&parcel_task(), 5).await.unwrap();
        store.claim_batch("slow", 10, LEASE).await.unwrap();
        clock.advance(ChronoDuration::seconds(301));
        store.claim_batch("fresh", 10, LEASE).await.unwrap();

        assert!(!store.release(task.id, "slow").await.unwrap());
        let row = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.claimed_by.as_deref(), Some("fresh"));
        assert_eq!(row.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_list_by_status_newest_first() {
        let (store, clock) = store_with_clock();
        let older = store.enqueue(&parcel_task(), 5).await.unwrap();
        clock.advance(ChronoDuration::seconds(5));
        let newer = store.enqueue(&parcel_task(), 5).await.unwrap();

        let pending = store.list_by_status(TaskStatus::Pending, 10).await.unwrap();
        assert_eq!(
            pending.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert_eq!(store.list_by_status(TaskStatus::Pending, 1).await.unwrap().len(), 1);
        assert!(store.list_by_status(TaskStatus::Dead, 10).await.unwrap().is_empty());
    }
}
