//! Enqueue and operator lookup routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use relay_common::error::AppError;
use relay_common::types::{NewTask, NotificationTask, TaskStatus};

use crate::middleware::auth::WorkerAuth;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(enqueue_task))
        .route("/api/tasks/{id}", get(get_task))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<TaskStatus>,
    limit: Option<u32>,
}

/// POST /api/tasks: Enqueue a task.
async fn enqueue_task(
    State(state): State<AppState>,
    _auth: WorkerAuth,
    Json(task): Json<NewTask>,
) -> Result<(StatusCode, Json<NotificationTask>), AppError> {
    let max_attempts = task
        .max_attempts
        .unwrap_or_else(|| state.config.max_attempts_for(&task.task_type));

    let row = state.store.enqueue(&task, max_attempts).await?;
    tracing::info!(
        task_id = %row.id,
        task_type = %row.task_type,
        max_attempts,
        "Task enqueued"
    );
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/tasks/{id}: Fetch one task.
async fn get_task(
    State(state): State<AppState>,
    _auth: WorkerAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationTask>, AppError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
}

/// GET /api/tasks?status=dead&limit=N: List tasks in one status, newest first.
async fn list_tasks(
    State(state): State<AppState>,
    _auth: WorkerAuth,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<NotificationTask>>, AppError> {
    let status = query.status.unwrap_or(TaskStatus::Dead);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let tasks = state.store.list_by_status(status, limit).await?;
    Ok(Json(tasks))
}
