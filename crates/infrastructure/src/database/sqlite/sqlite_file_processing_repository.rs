use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use filepipe_domain::{
    FileProcessing, FileProcessingFilter, FileProcessingRepository, ProcessStatus,
};
use filepipe_errors::{PipelineError, PipelineResult};

pub struct SqliteFileProcessingRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "id, file_id, file_name, source_type, source_id, source_file_id, \
     file_type, size, file_hash, status, start_time, end_time, created_at, updated_at";

impl SqliteFileProcessingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<FileProcessing> {
        Ok(FileProcessing {
            id: row.try_get("id").map_err(PipelineError::Database)?,
            file_id: row.try_get("file_id").map_err(PipelineError::Database)?,
            file_name: row.try_get("file_name").map_err(PipelineError::Database)?,
            source_type: row.try_get("source_type").map_err(PipelineError::Database)?,
            source_id: row.try_get("source_id").map_err(PipelineError::Database)?,
            source_file_id: row
                .try_get("source_file_id")
                .map_err(PipelineError::Database)?,
            file_type: row.try_get("file_type").map_err(PipelineError::Database)?,
            size: row.try_get("size").map_err(PipelineError::Database)?,
            file_hash: row.try_get("file_hash").map_err(PipelineError::Database)?,
            status: row.try_get("status").map_err(PipelineError::Database)?,
            start_time: row.try_get("start_time").map_err(PipelineError::Database)?,
            end_time: row.try_get("end_time").map_err(PipelineError::Database)?,
            created_at: row.try_get("created_at").map_err(PipelineError::Database)?,
            updated_at: row.try_get("updated_at").map_err(PipelineError::Database)?,
        })
    }

    /// 目标状态的合法前置集合，拼进WHERE子句做条件更新
    fn priors_clause(status: ProcessStatus) -> String {
        status
            .valid_priors()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn filter_conditions(filter: &FileProcessingFilter) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();
        if let Some(status) = filter.status {
            conditions.push("status = ?".to_string());
            binds.push(status.as_str().to_string());
        }
        if let Some(source_type) = filter.source_type {
            conditions.push("source_type = ?".to_string());
            binds.push(source_type.as_str().to_string());
        }
        if let Some(file_type) = &filter.file_type {
            conditions.push("file_type = ?".to_string());
            binds.push(file_type.clone());
        }
        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, binds)
    }
}

#[async_trait]
impl FileProcessingRepository for SqliteFileProcessingRepository {
    async fn create(&self, record: &FileProcessing) -> PipelineResult<FileProcessing> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO file_processing (file_id, file_name, source_type, source_id, source_file_id,
                                         file_type, size, file_hash, status, start_time, end_time,
                                         created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&record.file_id)
        .bind(&record.file_name)
        .bind(record.source_type)
        .bind(&record.source_id)
        .bind(&record.source_file_id)
        .bind(&record.file_type)
        .bind(record.size)
        .bind(&record.file_hash)
        .bind(record.status)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let created = Self::row_to_record(&row)?;
        debug!(file_id = %created.file_id, "创建文件处理记录");
        Ok(created)
    }

    async fn get_by_file_id(&self, file_id: &str) -> PipelineResult<Option<FileProcessing>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM file_processing WHERE file_id = $1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        file_id: &str,
        status: ProcessStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        // wait 没有合法前置，IN () 不是合法SQL，直接拒绝
        if status.valid_priors().is_empty() {
            return match self.get_by_file_id(file_id).await? {
                Some(current) => Err(PipelineError::invalid_transition(current.status, status)),
                None => Err(PipelineError::record_not_found(file_id)),
            };
        }
        // 条件更新：前置状态不匹配时影响0行，并发重复投递也会在这里被拦下
        let sql = format!(
            r#"
            UPDATE file_processing
            SET status = $2,
                start_time = COALESCE($3, start_time),
                end_time = COALESCE($4, end_time),
                updated_at = $5
            WHERE file_id = $1 AND status IN ({})
            "#,
            Self::priors_clause(status)
        );
        let result = sqlx::query(&sql)
            .bind(file_id)
            .bind(status)
            .bind(start_time)
            .bind(end_time)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return match self.get_by_file_id(file_id).await? {
                Some(current) => Err(PipelineError::invalid_transition(current.status, status)),
                None => Err(PipelineError::record_not_found(file_id)),
            };
        }

        debug!(file_id, status = %status, "状态已更新");
        Ok(())
    }

    async fn list(&self, filter: &FileProcessingFilter) -> PipelineResult<Vec<FileProcessing>> {
        let (clause, binds) = Self::filter_conditions(filter);
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM file_processing{clause} ORDER BY created_at DESC, id DESC"
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(PipelineError::Database)?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self, filter: &FileProcessingFilter) -> PipelineResult<i64> {
        let (clause, binds) = Self::filter_conditions(filter);
        let sql = format!("SELECT COUNT(*) as cnt FROM file_processing{clause}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::Database)?;
        row.try_get("cnt").map_err(PipelineError::Database)
    }

    async fn batch_update_status(
        &self,
        file_ids: &[String],
        status: ProcessStatus,
    ) -> PipelineResult<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        if status.valid_priors().is_empty() {
            return Err(PipelineError::validation_error(format!(
                "没有状态能转换到 {status}"
            )));
        }
        let placeholders = file_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE file_processing SET status = ?, updated_at = ? \
             WHERE file_id IN ({placeholders}) AND status IN ({})",
            Self::priors_clause(status)
        );
        let mut query = sqlx::query(&sql).bind(status).bind(Utc::now());
        for file_id in file_ids {
            query = query.bind(file_id);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_file_id(&self, file_id: &str) -> PipelineResult<bool> {
        let result = sqlx::query("DELETE FROM file_processing WHERE file_id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn status_statistics(&self) -> PipelineResult<HashMap<String, i64>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) as cnt FROM file_processing GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(PipelineError::Database)?;
        let mut stats = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status").map_err(PipelineError::Database)?;
            let count: i64 = row.try_get("cnt").map_err(PipelineError::Database)?;
            stats.insert(status, count);
        }
        Ok(stats)
    }

    async fn source_type_statistics(&self) -> PipelineResult<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT source_type, COUNT(*) as cnt FROM file_processing GROUP BY source_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        let mut stats = HashMap::new();
        for row in rows {
            let source_type: String = row.try_get("source_type").map_err(PipelineError::Database)?;
            let count: i64 = row.try_get("cnt").map_err(PipelineError::Database)?;
            stats.insert(source_type, count);
        }
        Ok(stats)
    }
}
