use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::task::{Task, TaskStatus};

/// Durable record of tasks.
///
/// Every operation is atomic with respect to a single task row. Status
/// changes go through [`TaskStore::update_status`], which refuses any move
/// the state machine does not allow.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task in `CREATED` state.
    async fn create(&self, owner_id: Uuid, animal: &str, text: &str) -> Result<Task, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Move a task forward. `image_uri` must be `Some` exactly when `status` is `Done`.
    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        image_uri: Option<&str>,
    ) -> Result<(), StoreError>;

    /// An owner's tasks, newest first.
    async fn list_by_owner(&self, owner_id: Uuid, include_deleted: bool)
        -> Result<Vec<Task>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Task {id} cannot move from {from} to {to}")]
    Conflict {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// PostgreSQL-backed task store.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, owner_id: Uuid, animal: &str, text: &str) -> Result<Task, StoreError> {
        Ok(queries::create_task(&self.pool, owner_id, animal, text).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        queries::get_task(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        image_uri: Option<&str>,
    ) -> Result<(), StoreError> {
        if queries::transition_task(&self.pool, id, status, image_uri).await? {
            return Ok(());
        }

        // Nothing updated: tell an unknown id apart from an illegal move.
        let current = self.get(id).await?;
        Err(StoreError::Conflict {
            id,
            from: current.status,
            to: status,
        })
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(queries::list_tasks_by_owner(&self.pool, owner_id, include_deleted).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(queries::ping(&self.pool).await?)
    }
}
