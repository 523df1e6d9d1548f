use std::sync::Arc;
use std::time::Duration;

use relay_common::config::{CronConfig, QueueConfig};
use relay_common::types::RunSummary;
use relay_notifier::NotificationWorker;

/// Headroom on top of the longest run the endpoint can take.
const REQUEST_SLACK: Duration = Duration::from_secs(30);

/// What a single tick ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The processing endpoint ran the batch.
    Remote { worker: String, processed: usize },
    /// The endpoint was unavailable and the batch ran in-process.
    Fallback { worker: String, processed: usize },
}

/// Periodically asks the API to process the queue, running a smaller batch
/// in-process when the API cannot be reached.
pub struct CronTrigger {
    client: reqwest::Client,
    worker_url: String,
    secret: Option<String>,
    interval: Duration,
    request_timeout: Duration,
    fallback: Option<Arc<NotificationWorker>>,
    fallback_batch_size: u32,
}

impl CronTrigger {
    pub fn new(config: &CronConfig, queue: &QueueConfig, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            worker_url: config.worker_url.clone(),
            secret,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            request_timeout: request_timeout(queue),
            fallback: None,
            fallback_batch_size: config.fallback_batch_size,
        }
    }

    /// Process the queue directly when the endpoint fails.
    pub fn with_fallback(mut self, worker: Arc<NotificationWorker>) -> Self {
        self.fallback = Some(worker);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Run ticks until the task is cancelled. A failed tick is logged and the
    /// next one still fires.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            worker_url = %self.worker_url,
            interval_secs = self.interval.as_secs(),
            fallback = self.fallback.is_some(),
            "Cron trigger started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(TickOutcome::Remote { worker, processed }) => {
                    tracing::info!(worker = %worker, processed, "Queue processed by API");
                }
                Ok(TickOutcome::Fallback { worker, processed }) => {
                    tracing::info!(worker = %worker, processed, "Queue processed directly");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cron tick failed");
                }
            }
        }
    }

    pub async fn tick(&self) -> anyhow::Result<TickOutcome> {
        let remote_err = match self.call_endpoint().await {
            Ok(summary) => {
                return Ok(TickOutcome::Remote {
                    worker: summary.worker,
                    processed: summary.processed,
                });
            }
            Err(e) => e,
        };

        let Some(worker) = &self.fallback else {
            return Err(remote_err.context("processing endpoint failed and no fallback configured"));
        };

        tracing::warn!(
            error = %remote_err,
            batch_size = self.fallback_batch_size,
            "Processing endpoint failed; processing queue directly"
        );
        let summary = worker.run_batch("cron-fallback", self.fallback_batch_size).await?;
        Ok(TickOutcome::Fallback {
            worker: summary.worker,
            processed: summary.processed,
        })
    }

    async fn call_endpoint(&self) -> anyhow::Result<RunSummary> {
        let mut request = self
            .client
            .post(&self.worker_url)
            .json(&serde_json::json!({ "trigger": "cron" }))
            .timeout(self.request_timeout);
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("processing endpoint returned {}: {}", status, body);
        }

        Ok(resp.json::<RunSummary>().await?)
    }
}

/// Longest an endpoint run can take: the claim, then every task dispatched
/// up to its timeout. Dispatching stops once the lease runs short, so the
/// lease bounds the dispatch phase.
fn request_timeout(queue: &QueueConfig) -> Duration {
    let dispatch = queue
        .dispatch_timeout()
        .saturating_mul(queue.batch_size)
        .min(queue.lease());
    queue.claim_timeout() + dispatch + REQUEST_SLACK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cron_config() -> CronConfig {
        CronConfig {
            interval_secs: 60,
            worker_url: "http://127.0.0.1:1/api/notification-worker".to_string(),
            fallback_batch_size: 5,
        }
    }

    #[test]
    fn test_request_timeout_covers_a_full_lease() {
        // 10 x 60s of dispatch is cut off by the 300s lease.
        let queue = QueueConfig::default();
        let trigger = CronTrigger::new(&cron_config(), &queue, None);
        assert_eq!(
            trigger.request_timeout(),
            queue.claim_timeout() + queue.lease() + REQUEST_SLACK
        );
        assert!(trigger.request_timeout() > queue.lease());
    }

    #[test]
    fn test_request_timeout_for_small_batches() {
        let queue = QueueConfig {
            batch_size: 2,
            ..QueueConfig::default()
        };
        assert_eq!(
            request_timeout(&queue),
            queue.claim_timeout() + queue.dispatch_timeout() * 2 + REQUEST_SLACK
        );
    }
}
