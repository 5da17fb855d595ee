use garde::Validate;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::task::{CreateTaskRequest, TaskView};
use crate::services::queue::{QueueError, WorkQueue};
use crate::services::store::{StoreError, TaskStore};

/// Errors surfaced to callers of the producer and query services.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task request: {0}")]
    Validation(String),

    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The task row exists but its id never reached the queue.
    #[error("Task {task_id} was stored but could not be queued: {source}")]
    QueueUnavailable {
        task_id: Uuid,
        #[source]
        source: QueueError,
    },

    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TaskError::NotFound(id),
            other => TaskError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Producer side: records new tasks and hands them to the worker.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate, persist as `CREATED`, then enqueue exactly once.
    pub async fn create_task(
        &self,
        owner_id: Uuid,
        request: CreateTaskRequest,
    ) -> Result<Uuid, TaskError> {
        request
            .validate()
            .map_err(|report| TaskError::Validation(report.to_string()))?;

        let task = self
            .store
            .create(owner_id, &request.animal, &request.text)
            .await?;

        if let Err(e) = self.queue.enqueue(task.id).await {
            metrics::counter!("tasks_enqueue_failed_total").increment(1);
            tracing::error!(
                alert = true,
                fault = "enqueue_after_create",
                task_id = %task.id,
                owner_id = %owner_id,
                error = %e,
                "Task stored but not queued; it will stay CREATED until re-enqueued"
            );
            return Err(TaskError::QueueUnavailable {
                task_id: task.id,
                source: e,
            });
        }

        metrics::counter!("tasks_created_total").increment(1);
        tracing::info!(
            task_id = %task.id,
            owner_id = %owner_id,
            animal = %task.animal,
            "Task created and queued"
        );

        Ok(task.id)
    }
}

/// Read side: owner-scoped views of tasks for status polling.
pub struct TaskQueryService {
    store: Arc<dyn TaskStore>,
}

impl TaskQueryService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// The owner's live tasks, newest first.
    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<TaskView>, TaskError> {
        let tasks = self.store.list_by_owner(owner_id, false).await?;
        Ok(tasks.iter().map(|t| t.view()).collect())
    }

    /// A single task, if it exists, is live, and belongs to `owner_id`.
    ///
    /// Someone else's task reports `NotFound` so ids do not leak.
    pub async fn get_for_owner(&self, task_id: Uuid, owner_id: Uuid) -> Result<TaskView, TaskError> {
        let task = self.store.get(task_id).await?;

        if task.owner_id != owner_id || task.is_deleted() {
            return Err(TaskError::NotFound(task_id));
        }

        Ok(task.view())
    }
}
