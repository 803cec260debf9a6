//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    FileProcessing, FileProcessingFilter, PipelineEvent, ProcessStatus, TaskConfig, TaskExecution,
};
use filepipe_errors::PipelineResult;

/// 文件处理记录仓储抽象
///
/// `update_status` 在SQL层做条件更新：目标状态的合法前置状态
/// 写进WHERE子句，影响0行即判定为非法转换。
#[async_trait]
pub trait FileProcessingRepository: Send + Sync {
    async fn create(&self, record: &FileProcessing) -> PipelineResult<FileProcessing>;
    async fn get_by_file_id(&self, file_id: &str) -> PipelineResult<Option<FileProcessing>>;
    async fn update_status(
        &self,
        file_id: &str,
        status: ProcessStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> PipelineResult<()>;
    async fn list(&self, filter: &FileProcessingFilter) -> PipelineResult<Vec<FileProcessing>>;
    async fn count(&self, filter: &FileProcessingFilter) -> PipelineResult<i64>;
    async fn batch_update_status(
        &self,
        file_ids: &[String],
        status: ProcessStatus,
    ) -> PipelineResult<u64>;
    async fn delete_by_file_id(&self, file_id: &str) -> PipelineResult<bool>;
    async fn status_statistics(&self) -> PipelineResult<HashMap<String, i64>>;
    async fn source_type_statistics(&self) -> PipelineResult<HashMap<String, i64>>;
}

/// 处理审计事件仓储抽象（仅追加）
#[async_trait]
pub trait PipelineEventRepository: Send + Sync {
    async fn record(&self, event: &PipelineEvent) -> PipelineResult<PipelineEvent>;
    /// 核心幂等查询：该处理器是否已成功处理过该哈希的文件
    async fn has_success(
        &self,
        file_path: &str,
        processor_name: &str,
        file_hash: &str,
    ) -> PipelineResult<bool>;
    async fn find_by_file(&self, file_path: &str) -> PipelineResult<Vec<PipelineEvent>>;
    async fn latest_result(
        &self,
        file_path: &str,
        processor_name: &str,
    ) -> PipelineResult<Option<PipelineEvent>>;
}

/// 定时任务配置与执行历史仓储抽象
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_task(&self, task_id: &str) -> PipelineResult<Option<TaskConfig>>;
    async fn save_task(&self, config: &TaskConfig) -> PipelineResult<TaskConfig>;
    async fn update_task(
        &self,
        task_id: &str,
        enabled: Option<bool>,
        interval_seconds: Option<i64>,
    ) -> PipelineResult<TaskConfig>;
    async fn list_tasks(&self) -> PipelineResult<Vec<TaskConfig>>;
    async fn record_execution(&self, execution: &TaskExecution) -> PipelineResult<TaskExecution>;
    async fn executions(&self, task_id: &str, limit: i64) -> PipelineResult<Vec<TaskExecution>>;
}

/// 知识空间映射的只读查询
///
/// 映射缺失时由调用方回退到文件名主干。
#[async_trait]
pub trait KnowledgeMappingRepository: Send + Sync {
    async fn space_for_source(&self, source_id: &str) -> PipelineResult<Option<String>>;
}
