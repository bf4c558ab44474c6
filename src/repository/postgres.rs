//! Task documents stored as JSONB rows in `pipeline_tasks`.

use super::{TaskRepository, TaskUpdate};
use crate::error::{PipelineError, PipelineResult};
use crate::models::task::Task;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn find_by_id(&self, id: Uuid) -> PipelineResult<Option<Task>> {
        let document: Option<Json<Task>> =
            sqlx::query_scalar("SELECT document FROM pipeline_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|d| d.0))
    }

    async fn insert(&self, task: &Task) -> PipelineResult<()> {
        sqlx::query("INSERT INTO pipeline_tasks (id, document, created_at) VALUES ($1, $2, $3)")
            .bind(task.id)
            .bind(Json(task))
            .bind(task.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, id: Uuid, update: TaskUpdate) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await?;

        let document: Option<Json<Task>> =
            sqlx::query_scalar("SELECT document FROM pipeline_tasks WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let mut task = document
            .map(|d| d.0)
            .ok_or_else(|| PipelineError::not_found("Task", id))?;

        debug!(task_id = %id, update = ?update, "Applying task update");
        update.apply(&mut task)?;

        sqlx::query("UPDATE pipeline_tasks SET document = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(&task))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
