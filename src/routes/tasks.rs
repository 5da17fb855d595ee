use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::CurrentUser;
use crate::models::response::ApiResponse;
use crate::models::task::{CreateTaskRequest, CreateTaskResponse, TaskListResponse, TaskView};
use crate::routes::error::AppError;
use crate::services::tasks::TaskError;

/// POST /tasks/create: record a task and queue it for generation.
pub async fn create_task(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<CreateTaskResponse>>, AppError> {
    let Json(request) = payload.map_err(|e| TaskError::Validation(e.body_text()))?;

    tracing::debug!(username = %user.username, owner_id = %user.user_id, "Create task request");

    let task_id = state.tasks.create_task(user.user_id, request).await?;

    Ok(Json(ApiResponse::ok(CreateTaskResponse { task_id })))
}

/// GET /tasks: the caller's tasks, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<TaskListResponse>>, AppError> {
    let tasks = state.queries.list_for_owner(user.user_id).await?;
    tracing::debug!(username = %user.username, count = tasks.len(), "Listed tasks");

    Ok(Json(ApiResponse::ok(TaskListResponse { tasks })))
}

/// GET /tasks/{task_id}: one of the caller's tasks.
pub async fn get_task(
    State(state): State<AppState>,
    user: CurrentUser,
    task_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiResponse<TaskView>>, AppError> {
    let Path(task_id) = task_id.map_err(|e| TaskError::Validation(e.body_text()))?;

    let task = state.queries.get_for_owner(task_id, user.user_id).await?;

    Ok(Json(ApiResponse::ok(task)))
}
