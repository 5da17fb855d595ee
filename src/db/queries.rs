use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::task::{Task, TaskStatus};

const TASK_COLUMNS: &str = "id, owner_id, status, animal, text, image_uri, created_at, deleted_at";

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = TaskStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(Task {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        status,
        animal: row.try_get("animal")?,
        text: row.try_get("text")?,
        image_uri: row.try_get("image_uri")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// Insert a new task in `CREATED` state
pub async fn create_task(
    pool: &PgPool,
    owner_id: Uuid,
    animal: &str,
    text: &str,
) -> Result<Task, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tasks (owner_id, status, animal, text)
        VALUES ($1, 'CREATED', $2, $3)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(owner_id)
    .bind(animal)
    .bind(text)
    .fetch_one(pool)
    .await?;

    task_from_row(&row)
}

/// Get a task by ID, regardless of owner or soft-delete marker
pub async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {TASK_COLUMNS}
        FROM tasks
        WHERE id = $1
        "#
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Move a task to `status`, only if its current status is a legal predecessor.
///
/// Returns `false` when no row was updated (unknown id or illegal transition).
pub async fn transition_task(
    pool: &PgPool,
    task_id: Uuid,
    status: TaskStatus,
    image_uri: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let predecessors: Vec<String> = status
        .allowed_predecessors()
        .iter()
        .map(ToString::to_string)
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1,
            image_uri = $2,
            updated_at = NOW()
        WHERE id = $3
          AND status = ANY($4)
        "#,
    )
    .bind(status.to_string())
    .bind(image_uri)
    .bind(task_id)
    .bind(predecessors)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// List an owner's tasks, newest first
pub async fn list_tasks_by_owner(
    pool: &PgPool,
    owner_id: Uuid,
    include_deleted: bool,
) -> Result<Vec<Task>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {TASK_COLUMNS}
        FROM tasks
        WHERE owner_id = $1
          AND ($2 OR deleted_at IS NULL)
        ORDER BY created_at DESC
        "#
    ))
    .bind(owner_id)
    .bind(include_deleted)
    .fetch_all(pool)
    .await?;

    rows.iter().map(task_from_row).collect()
}

/// Cheap connectivity probe
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
