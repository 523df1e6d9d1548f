//! Shared application state for the Axum API server.

use std::sync::Arc;

use relay_common::config::AppConfig;
use relay_notifier::NotificationWorker;
use relay_queue::TaskStore;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub worker: Arc<NotificationWorker>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn TaskStore>, worker: NotificationWorker, config: AppConfig) -> Self {
        Self {
            store,
            worker: Arc::new(worker),
            config: Arc::new(config),
        }
    }
}
