//! Worker invocation: claim a batch, dispatch each task, report the outcome.
//!
//! One invocation processes its claimed tasks sequentially and then returns.
//! Nothing a single task does (dispatch error, store error, settlement error)
//! stops the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use relay_common::config::{QueueConfig, SettlementTarget};
use relay_common::types::{NotificationTask, OutcomeStatus, RunSummary, TaskOutcome};
use relay_queue::{Clock, Completion, FailOutcome, StoreError, SystemClock, TaskStore};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::settlement::{Settled, Settlement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub batch_size: u32,
    pub lease: Duration,
    pub dispatch_timeout: Duration,
    pub claim_timeout: Duration,
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            lease: config.lease(),
            dispatch_timeout: config.dispatch_timeout(),
            claim_timeout: config.claim_timeout(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

pub struct NotificationWorker {
    store: Arc<dyn TaskStore>,
    dispatcher: Dispatcher,
    settlement: Arc<dyn Settlement>,
    targets: HashMap<String, SettlementTarget>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

impl NotificationWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Dispatcher,
        settlement: Arc<dyn Settlement>,
        targets: HashMap<String, SettlementTarget>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            settlement,
            targets,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run one invocation with the configured batch size.
    ///
    /// Errors only when nothing could be claimed because the store failed;
    /// in that case no task was touched and lease expiry covers recovery.
    pub async fn run(&self, trigger: &str) -> Result<RunSummary, StoreError> {
        self.run_batch(trigger, self.settings.batch_size).await
    }

    pub async fn run_batch(&self, trigger: &str, batch_size: u32) -> Result<RunSummary, StoreError> {
        let worker_id = new_worker_id();

        let claim = self
            .store
            .claim_batch(&worker_id, batch_size, self.settings.lease);
        let tasks = tokio::time::timeout(self.settings.claim_timeout, claim)
            .await
            .map_err(|_| StoreError::Timeout(self.settings.claim_timeout))??;

        if tasks.is_empty() {
            tracing::debug!(worker_id = %worker_id, trigger, "No pending tasks");
        } else {
            tracing::info!(
                worker_id = %worker_id,
                trigger,
                tasks = tasks.len(),
                "Processing notification tasks"
            );
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in &tasks {
            results.push(self.process(&worker_id, task).await);
        }

        Ok(RunSummary {
            worker: worker_id,
            processed: results.len(),
            results,
        })
    }

    async fn process(&self, worker_id: &str, task: &NotificationTask) -> TaskOutcome {
        // A dispatch may run for the full timeout; it has to finish while the
        // claim is still ours, or a second worker could send the same task.
        if !self.lease_covers_dispatch(task) {
            return self.defer(worker_id, task).await;
        }

        let dispatched = tokio::time::timeout(
            self.settings.dispatch_timeout,
            self.dispatcher.dispatch(task),
        )
        .await
        .unwrap_or(Err(DispatchError::Timeout(self.settings.dispatch_timeout)));

        match dispatched {
            Ok(_) => self.complete(task).await,
            Err(err) => self.fail(worker_id, task, err).await,
        }
    }

    fn lease_covers_dispatch(&self, task: &NotificationTask) -> bool {
        let Some(expires_at) = task.lease_expires_at else {
            return false;
        };
        let needed = chrono::Duration::from_std(self.settings.dispatch_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        expires_at - self.clock.now() >= needed
    }

    async fn defer(&self, worker_id: &str, task: &NotificationTask) -> TaskOutcome {
        let reason = "lease too short to dispatch; released for the next invocation";
        match self.store.release(task.id, worker_id).await {
            Ok(true) => {
                tracing::warn!(
                    task_id = %task.id,
                    lease_expires_at = ?task.lease_expires_at,
                    dispatch_timeout = ?self.settings.dispatch_timeout,
                    "Claim released without dispatching"
                );
                outcome(task.id, OutcomeStatus::Deferred, Some(reason.to_string()))
            }
            Ok(false) => {
                tracing::warn!(task_id = %task.id, "Lease lost before dispatch");
                outcome(task.id, OutcomeStatus::Unreported, Some(reason.to_string()))
            }
            Err(e) => {
                // The claim stays in place and expires on its own.
                tracing::error!(task_id = %task.id, error = %e, "Could not release claim");
                outcome(task.id, OutcomeStatus::Unreported, Some(format!("{reason}; {e}")))
            }
        }
    }

    async fn complete(&self, task: &NotificationTask) -> TaskOutcome {
        match self.store.complete(task.id).await {
            Ok(completion) => {
                if completion == Completion::AlreadyCompleted {
                    tracing::info!(task_id = %task.id, "Task was already completed by another worker");
                } else {
                    tracing::info!(task_id = %task.id, attempt = task.attempt_count, "Task completed");
                }
                let error = self.settle(task).await.err();
                outcome(task.id, OutcomeStatus::Completed, error)
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Delivered but could not mark task complete");
                outcome(task.id, OutcomeStatus::Unreported, Some(e.to_string()))
            }
        }
    }

    async fn fail(&self, worker_id: &str, task: &NotificationTask, err: DispatchError) -> TaskOutcome {
        let message = err.to_string();
        let kind = err.kind();

        match self.store.fail(task.id, worker_id, &message, kind).await {
            Ok(FailOutcome::Retrying { next_visible_at }) => {
                tracing::warn!(
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    max_attempts = task.max_attempts,
                    %next_visible_at,
                    error = %message,
                    "Task failed; retry scheduled"
                );
                outcome(task.id, OutcomeStatus::Retrying, Some(message))
            }
            Ok(FailOutcome::Dead) => {
                tracing::error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt_count = task.attempt_count,
                    max_attempts = task.max_attempts,
                    ?kind,
                    last_error = %message,
                    "Task is dead; notification abandoned"
                );
                outcome(task.id, OutcomeStatus::Dead, Some(message))
            }
            Ok(FailOutcome::LeaseLost) => {
                tracing::warn!(task_id = %task.id, error = %message, "Lease lost before failure could be recorded");
                outcome(task.id, OutcomeStatus::Unreported, Some(message))
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Could not record task failure");
                outcome(task.id, OutcomeStatus::Unreported, Some(format!("{message}; {e}")))
            }
        }
    }

    /// Apply the configured write-back. Returns the error text on failure.
    async fn settle(&self, task: &NotificationTask) -> Result<(), String> {
        let Some(source) = task.source_ref() else {
            return Ok(());
        };
        let Some(target) = self.targets.get(&task.task_type) else {
            return Ok(());
        };
        if source.table != target.table {
            tracing::warn!(
                task_id = %task.id,
                source_table = %source.table,
                expected = %target.table,
                "Source table does not match settlement target; skipping"
            );
            return Ok(());
        }

        match self.settlement.settle(target, &source, self.clock.now()).await {
            Ok(Settled::Applied) => {
                tracing::info!(task_id = %task.id, source_id = %source.id, "Source settled");
                Ok(())
            }
            Ok(Settled::Unchanged) => {
                tracing::debug!(task_id = %task.id, source_id = %source.id, "Source already settled");
                Ok(())
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, source_id = %source.id, error = %e, "Settlement failed");
                Err(format!("settlement failed: {e}"))
            }
        }
    }
}

fn outcome(id: Uuid, status: OutcomeStatus, error: Option<String>) -> TaskOutcome {
    TaskOutcome { id, status, error }
}

/// Ephemeral identity for one invocation.
fn new_worker_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}
