use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::response::ApiResponse;
use crate::services::tasks::TaskError;

/// Handler error rendered as an `ApiResponse` failure envelope.
#[derive(Debug)]
pub struct AppError(pub TaskError);

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        AppError(err)
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            TaskError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            TaskError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            TaskError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            TaskError::QueueUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable")
            }
            TaskError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Infrastructure details stay in the logs.
        let message = match &self.0 {
            TaskError::QueueUnavailable { task_id, .. } => {
                format!("Task {task_id} was saved but could not be scheduled")
            }
            TaskError::StoreUnavailable(_) => "Task storage is temporarily unavailable".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        (status, Json(ApiResponse::<()>::failure(code, message))).into_response()
    }
}
