pub mod health;
pub mod tasks;
pub mod worker;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(worker::router())
        .merge(tasks::router())
        .with_state(state)
}
