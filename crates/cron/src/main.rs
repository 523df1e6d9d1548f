use std::sync::Arc;

use relay_common::config::AppConfig;
use relay_common::db;
use relay_cron::trigger::CronTrigger;
use relay_notifier::channels::adapters_from_config;
use relay_notifier::{Dispatcher, NotificationWorker, PgSettlement, WorkerSettings};
use relay_queue::{Backoff, PgTaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_cron=info,relay_notifier=info,relay_queue=info".into()),
        )
        .json()
        .init();

    tracing::info!("Hub relay cron starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Direct processing path used when the API is unreachable
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    let store = Arc::new(PgTaskStore::new(pool.clone(), Backoff::from_config(&config.queue)));
    let (email, sms) = adapters_from_config(&config.channels);
    let worker = NotificationWorker::new(
        store,
        Dispatcher::new(email, sms),
        Arc::new(PgSettlement::new(pool)),
        config.settlement_targets(),
        WorkerSettings::from(&config.queue),
    );

    let trigger = CronTrigger::new(&config.cron, &config.queue, config.worker_secret.clone())
        .with_fallback(Arc::new(worker));

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = trigger.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Cron trigger exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Hub relay cron stopped.");
    Ok(())
}
