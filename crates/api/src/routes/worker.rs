//! Processing endpoint called by the database webhook and the cron trigger.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use relay_common::error::AppError;
use relay_common::types::RunSummary;

use crate::middleware::auth::{Caller, WorkerAuth};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notification-worker", post(run_worker))
}

#[derive(Debug, Default, Deserialize)]
struct TriggerBody {
    trigger: Option<String>,
}

/// POST /api/notification-worker: Claim and process one batch.
///
/// The body is optional and only used for logging. Per-task failures are
/// reported in the summary; only a failed claim is an error response.
async fn run_worker(
    State(state): State<AppState>,
    auth: WorkerAuth,
    body: Bytes,
) -> Result<Json<RunSummary>, AppError> {
    let body: TriggerBody = serde_json::from_slice(&body).unwrap_or_default();
    let trigger = body.trigger.unwrap_or_else(|| match auth.caller {
        Caller::InternalWebhook => "webhook".to_string(),
        Caller::Bearer => "manual".to_string(),
    });

    let summary = state.worker.run(&trigger).await.map_err(|e| {
        tracing::error!(trigger = %trigger, error = %e, "Claim failed");
        AppError::from(e)
    })?;

    Ok(Json(summary))
}
