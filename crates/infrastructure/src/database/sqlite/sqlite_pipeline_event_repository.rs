use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use filepipe_domain::{PipelineEvent, PipelineEventRepository};
use filepipe_errors::{PipelineError, PipelineResult};

/// 处理审计日志存储，幂等判定依赖其中的成功记录
pub struct SqlitePipelineEventRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "id, file_path, event_type, processor_name, result, metadata, \
     output_files, file_hash, created_time";

impl SqlitePipelineEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<PipelineEvent> {
        let output_files: String = row.try_get("output_files").map_err(PipelineError::Database)?;
        Ok(PipelineEvent {
            id: row.try_get("id").map_err(PipelineError::Database)?,
            file_path: row.try_get("file_path").map_err(PipelineError::Database)?,
            event_type: row.try_get("event_type").map_err(PipelineError::Database)?,
            processor_name: row
                .try_get("processor_name")
                .map_err(PipelineError::Database)?,
            result: row.try_get("result").map_err(PipelineError::Database)?,
            metadata: row.try_get("metadata").map_err(PipelineError::Database)?,
            output_files: serde_json::from_str(&output_files)?,
            file_hash: row.try_get("file_hash").map_err(PipelineError::Database)?,
            created_time: row
                .try_get("created_time")
                .map_err(PipelineError::Database)?,
        })
    }
}

#[async_trait]
impl PipelineEventRepository for SqlitePipelineEventRepository {
    async fn record(&self, event: &PipelineEvent) -> PipelineResult<PipelineEvent> {
        let output_files = serde_json::to_string(&event.output_files)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pipeline_events (file_path, event_type, processor_name, result, metadata,
                                         output_files, file_hash, created_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&event.file_path)
        .bind(&event.event_type)
        .bind(&event.processor_name)
        .bind(event.result)
        .bind(&event.metadata)
        .bind(&output_files)
        .bind(&event.file_hash)
        .bind(event.created_time)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let recorded = Self::row_to_event(&row)?;
        debug!(
            file_path = %recorded.file_path,
            processor = %recorded.processor_name,
            result = %recorded.result,
            "记录处理事件"
        );
        Ok(recorded)
    }

    async fn has_success(
        &self,
        file_path: &str,
        processor_name: &str,
        file_hash: &str,
    ) -> PipelineResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as cnt FROM pipeline_events
            WHERE file_path = $1 AND processor_name = $2 AND file_hash = $3 AND result = 'success'
            "#,
        )
        .bind(file_path)
        .bind(processor_name)
        .bind(file_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        let count: i64 = row.try_get("cnt").map_err(PipelineError::Database)?;
        Ok(count > 0)
    }

    async fn find_by_file(&self, file_path: &str) -> PipelineResult<Vec<PipelineEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pipeline_events WHERE file_path = $1 ORDER BY id"
        ))
        .bind(file_path)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn latest_result(
        &self,
        file_path: &str,
        processor_name: &str,
    ) -> PipelineResult<Option<PipelineEvent>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM pipeline_events
            WHERE file_path = $1 AND processor_name = $2
            ORDER BY id DESC LIMIT 1
            "#
        ))
        .bind(file_path)
        .bind(processor_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        match row {
            Some(row) => Ok(Some(Self::row_to_event(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;
    use filepipe_domain::ProcessResult;
    use serde_json::json;

    fn event(file_path: &str, processor: &str, result: ProcessResult, hash: &str) -> PipelineEvent {
        PipelineEvent::new(
            file_path.to_string(),
            "process".to_string(),
            processor.to_string(),
            result,
        )
        .with_hash(Some(hash.to_string()))
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let repo = SqlitePipelineEventRepository::new(test_pool().await);
        let recorded = repo
            .record(
                &event("a.mp3", "stt", ProcessResult::Success, "h1")
                    .with_metadata(json!({"duration": 12.5}))
                    .with_output_files(vec!["a_transcript.txt".to_string()]),
            )
            .await
            .unwrap();

        assert!(recorded.id > 0);
        assert_eq!(recorded.metadata["duration"], json!(12.5));
        assert_eq!(recorded.output_files, vec!["a_transcript.txt"]);
        assert!(recorded.is_success());
    }

    #[tokio::test]
    async fn test_has_success_matches_hash_and_processor() {
        let repo = SqlitePipelineEventRepository::new(test_pool().await);
        repo.record(&event("a.mp3", "stt", ProcessResult::Success, "h1"))
            .await
            .unwrap();
        repo.record(&event("b.mp3", "stt", ProcessResult::Failed, "h2"))
            .await
            .unwrap();

        assert!(repo.has_success("a.mp3", "stt", "h1").await.unwrap());
        // 内容变了（新哈希）就不算已处理
        assert!(!repo.has_success("a.mp3", "stt", "h9").await.unwrap());
        // 其他处理器的成功不作数
        assert!(!repo.has_success("a.mp3", "knowledge", "h1").await.unwrap());
        // 失败记录不构成幂等跳过
        assert!(!repo.has_success("b.mp3", "stt", "h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_and_latest() {
        let repo = SqlitePipelineEventRepository::new(test_pool().await);
        repo.record(&event("a.mp3", "stt", ProcessResult::Failed, "h1"))
            .await
            .unwrap();
        repo.record(&event("a.mp3", "stt", ProcessResult::Success, "h1"))
            .await
            .unwrap();
        repo.record(&event("a.mp3", "knowledge", ProcessResult::Success, "h1"))
            .await
            .unwrap();

        let history = repo.find_by_file("a.mp3").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].result, ProcessResult::Failed);

        let latest = repo.latest_result("a.mp3", "stt").await.unwrap().unwrap();
        assert_eq!(latest.result, ProcessResult::Success);
        assert!(repo.latest_result("x.mp3", "stt").await.unwrap().is_none());
    }
}
