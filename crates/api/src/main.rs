//! Hub relay API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_common::config::AppConfig;
use relay_common::db::{create_pool, run_migrations};
use relay_notifier::channels::adapters_from_config;
use relay_notifier::{Dispatcher, NotificationWorker, PgSettlement, WorkerSettings};
use relay_queue::{Backoff, PgTaskStore};

use relay_api::routes::create_router;
use relay_api::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("relay_api=debug,relay_notifier=debug,relay_queue=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting hub relay API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    if config.worker_secret.is_none() {
        tracing::warn!("WORKER_SECRET not set; only internal webhook calls will be accepted");
    }

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database pool created, migrations applied");

    // Wire the queue, channels and worker
    let store = Arc::new(PgTaskStore::new(pool.clone(), Backoff::from_config(&config.queue)));
    let (email, sms) = adapters_from_config(&config.channels);
    let worker = NotificationWorker::new(
        store.clone(),
        Dispatcher::new(email, sms),
        Arc::new(PgSettlement::new(pool)),
        config.settlement_targets(),
        WorkerSettings::from(&config.queue),
    );

    let addr: SocketAddr = config.api_bind_addr.parse()?;
    let state = AppState::new(store, worker, config);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
