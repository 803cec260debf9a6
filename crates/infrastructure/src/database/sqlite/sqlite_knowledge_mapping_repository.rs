use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use filepipe_domain::KnowledgeMappingRepository;
use filepipe_errors::{PipelineError, PipelineResult};

/// 来源目录到知识空间的映射表
pub struct SqliteKnowledgeMappingRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 写入或更新一条映射，初始化和运维脚本使用
    pub async fn set_mapping(&self, source_id: &str, space_name: &str) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_mappings (source_id, space_name)
            VALUES ($1, $2)
            ON CONFLICT(source_id) DO UPDATE SET space_name = excluded.space_name
            "#,
        )
        .bind(source_id)
        .bind(space_name)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeMappingRepository for SqliteKnowledgeMappingRepository {
    async fn space_for_source(&self, source_id: &str) -> PipelineResult<Option<String>> {
        let row = sqlx::query("SELECT space_name FROM knowledge_mappings WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::Database)?;
        match row {
            Some(row) => Ok(Some(
                row.try_get("space_name").map_err(PipelineError::Database)?,
            )),
            None => Ok(None),
        }
    }
}
