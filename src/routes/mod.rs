use axum::{routing::get, routing::post, Router};

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod metrics;
pub mod tasks;

/// Task and health endpoints, ready for middleware layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/create", post(tasks::create_task))
        .route("/tasks/{task_id}", get(tasks::get_task))
        .with_state(state)
}
