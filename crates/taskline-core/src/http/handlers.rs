//! Route handlers. Each one is a thin call into `TaskService`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::app::SystemStatus;
use crate::domain::{Page, Task, TaskId, TaskPatch};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Response for delete and process.
#[derive(Debug, Serialize)]
pub struct TaskMessageResponse {
    pub message: String,
    pub task_id: TaskId,
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Taskline API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "tasks": "/tasks",
            "status": "/admin/status",
        },
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "environment": state.environment,
    }))
}

/// GET /tasks?skip&limit
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    page: Result<Query<Page>, QueryRejection>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let Query(page) = page?;
    Ok(Json(state.service.list(page).await?))
}

/// POST /tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(req) = body?;
    let task = state.service.create(req.title, req.description).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /tasks/:id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    id: Result<Path<TaskId>, PathRejection>,
) -> Result<Json<Task>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.get(id).await?))
}

/// PUT /tasks/:id
/// Only the fields present in the body are applied.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    id: Result<Path<TaskId>, PathRejection>,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    Ok(Json(state.service.update(id, patch).await?))
}

/// DELETE /tasks/:id
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    id: Result<Path<TaskId>, PathRejection>,
) -> Result<Json<TaskMessageResponse>, ApiError> {
    let Path(task_id) = id?;
    state.service.delete(task_id).await?;
    Ok(Json(TaskMessageResponse {
        message: format!("Task {task_id} deleted successfully"),
        task_id,
    }))
}

/// POST /tasks/:id/process
/// Reset to PENDING and send to the queue again.
pub async fn process_task(
    State(state): State<Arc<AppState>>,
    id: Result<Path<TaskId>, PathRejection>,
) -> Result<Json<TaskMessageResponse>, ApiError> {
    let Path(task_id) = id?;
    state.service.reprocess(task_id).await?;
    Ok(Json(TaskMessageResponse {
        message: format!("Task {task_id} sent to queue for processing"),
        task_id,
    }))
}

/// GET /admin/status
pub async fn admin_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, ApiError> {
    Ok(Json(state.service.status().await?))
}
