use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use filepipe_domain::{ScheduleRepository, TaskConfig, TaskExecution};
use filepipe_errors::{PipelineError, PipelineResult};

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<TaskConfig> {
        Ok(TaskConfig {
            task_id: row.try_get("task_id").map_err(PipelineError::Database)?,
            task_name: row.try_get("task_name").map_err(PipelineError::Database)?,
            description: row.try_get("description").map_err(PipelineError::Database)?,
            interval_seconds: row
                .try_get("interval_seconds")
                .map_err(PipelineError::Database)?,
            enabled: row.try_get("enabled").map_err(PipelineError::Database)?,
            created_at: row.try_get("created_at").map_err(PipelineError::Database)?,
            updated_at: row.try_get("updated_at").map_err(PipelineError::Database)?,
        })
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<TaskExecution> {
        Ok(TaskExecution {
            id: row.try_get("id").map_err(PipelineError::Database)?,
            task_id: row.try_get("task_id").map_err(PipelineError::Database)?,
            start_time: row.try_get("start_time").map_err(PipelineError::Database)?,
            end_time: row.try_get("end_time").map_err(PipelineError::Database)?,
            status: row.try_get("status").map_err(PipelineError::Database)?,
            error_message: row
                .try_get("error_message")
                .map_err(PipelineError::Database)?,
            execution_time_ms: row
                .try_get("execution_time_ms")
                .map_err(PipelineError::Database)?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn get_task(&self, task_id: &str) -> PipelineResult<Option<TaskConfig>> {
        let row = sqlx::query(
            "SELECT task_id, task_name, description, interval_seconds, enabled, created_at, updated_at \
             FROM task_configs WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_task(&self, task: &TaskConfig) -> PipelineResult<TaskConfig> {
        // 已有任务只刷新名称和描述，用户调过的间隔和开关保留
        let row = sqlx::query(
            r#"
            INSERT INTO task_configs (task_id, task_name, description, interval_seconds, enabled,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(task_id) DO UPDATE SET
                task_name = excluded.task_name,
                description = excluded.description,
                updated_at = excluded.updated_at
            RETURNING task_id, task_name, description, interval_seconds, enabled, created_at, updated_at
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.task_name)
        .bind(&task.description)
        .bind(task.interval_seconds)
        .bind(task.enabled)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let saved = Self::row_to_task(&row)?;
        debug!(task_id = %saved.task_id, "保存任务配置");
        Ok(saved)
    }

    async fn update_task(
        &self,
        task_id: &str,
        enabled: Option<bool>,
        interval_seconds: Option<i64>,
    ) -> PipelineResult<TaskConfig> {
        let result = sqlx::query(
            r#"
            UPDATE task_configs
            SET enabled = COALESCE($2, enabled),
                interval_seconds = COALESCE($3, interval_seconds),
                updated_at = $4
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(enabled)
        .bind(interval_seconds)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        match self.get_task(task_id).await? {
            Some(task) => Ok(task),
            None => Err(PipelineError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    async fn list_tasks(&self) -> PipelineResult<Vec<TaskConfig>> {
        let rows = sqlx::query(
            "SELECT task_id, task_name, description, interval_seconds, enabled, created_at, updated_at \
             FROM task_configs ORDER BY task_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn record_execution(&self, execution: &TaskExecution) -> PipelineResult<TaskExecution> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_executions (task_id, start_time, end_time, status, error_message,
                                         execution_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, task_id, start_time, end_time, status, error_message, execution_time_ms
            "#,
        )
        .bind(&execution.task_id)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.status)
        .bind(&execution.error_message)
        .bind(execution.execution_time_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        Self::row_to_execution(&row)
    }

    async fn executions(&self, task_id: &str, limit: i64) -> PipelineResult<Vec<TaskExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, start_time, end_time, status, error_message, execution_time_ms
            FROM task_executions
            WHERE task_id = $1
            ORDER BY start_time DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}
