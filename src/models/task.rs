use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of an image generation task.
///
/// `Created -> InProgress -> {Done | Error}`. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    InProgress,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// States a task may be in immediately before moving to `self`.
    ///
    /// `InProgress` may be re-entered: a redelivered task whose worker died
    /// mid-flight is picked up again from `InProgress`.
    pub fn allowed_predecessors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Created => &[],
            TaskStatus::InProgress => &[TaskStatus::Created, TaskStatus::InProgress],
            TaskStatus::Done => &[TaskStatus::InProgress],
            TaskStatus::Error => &[TaskStatus::InProgress],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

/// A persisted image generation task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: TaskStatus,
    pub animal: String,
    pub text: String,
    /// Artifact locator; present exactly when `status` is `Done`.
    pub image_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            animal: self.animal.clone(),
            text: self.text.clone(),
            status: self.status,
            image_uri: self.image_uri.clone(),
            created_at: self.created_at,
        }
    }
}

/// Owner-facing projection of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskView {
    pub id: Uuid,
    pub animal: String,
    pub text: String,
    pub status: TaskStatus,
    pub image_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a generation task.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateTaskRequest {
    #[garde(length(chars, max = 64))]
    pub animal: String,

    /// Printed on the shirt; at most 8 characters.
    #[garde(length(chars, max = 8))]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskView>,
}
