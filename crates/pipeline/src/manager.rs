//! 流水线编排
//!
//! 统一管理处理器的生命周期，提供重新投递、运行状态查询
//! 和健康检查。

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use filepipe_domain::{
    FileProcessing, FileProcessingFilter, FileProcessingRepository, Payload, ProcessStatus,
    QueueManager,
};
use filepipe_errors::{PipelineError, PipelineResult};
use filepipe_processor::{ProcessorRegistry, ProcessorStatus};

use crate::routing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

/// 批量重投的结果汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReprocessReport {
    pub total: usize,
    pub success_count: usize,
    pub reprocessed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Warning,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub database_ok: bool,
    pub producer_connected: bool,
    pub consuming_processors: usize,
}

pub struct PipelineManager {
    registry: Arc<ProcessorRegistry>,
    queue: Arc<dyn QueueManager>,
    files: Arc<dyn FileProcessingRepository>,
}

impl PipelineManager {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        queue: Arc<dyn QueueManager>,
        files: Arc<dyn FileProcessingRepository>,
    ) -> Self {
        Self {
            registry,
            queue,
            files,
        }
    }

    pub async fn start(&self) -> PipelineResult<()> {
        self.registry.start_all().await?;
        info!("流水线已启动");
        Ok(())
    }

    pub async fn stop(&self) -> PipelineResult<()> {
        self.registry.stop_all().await?;
        info!("流水线已停止");
        Ok(())
    }

    /// 按文件ID重新投递，状态机不允许的记录进失败列表
    pub async fn reprocess(&self, file_ids: &[String]) -> PipelineResult<ReprocessReport> {
        let mut report = ReprocessReport {
            total: file_ids.len(),
            ..Default::default()
        };
        for file_id in file_ids {
            match self.reprocess_one(file_id).await {
                Ok(()) => {
                    report.success_count += 1;
                    report.reprocessed.push(file_id.clone());
                }
                Err(error) => {
                    warn!(file_id = %file_id, %error, "重新投递失败");
                    report.failed.push((file_id.clone(), error.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn reprocess_one(&self, file_id: &str) -> PipelineResult<()> {
        let record = self
            .files
            .get_by_file_id(file_id)
            .await?
            .ok_or_else(|| PipelineError::record_not_found(file_id))?;

        // 失败的记录先转入重试态，其他状态保持不动
        let record = if record.status == ProcessStatus::Failed {
            self.files
                .update_status(file_id, ProcessStatus::Retrying, None, None)
                .await?;
            FileProcessing {
                status: ProcessStatus::Retrying,
                ..record
            }
        } else {
            record
        };

        let topic = routing::topic_for(&record);
        self.queue
            .publish_point_to_point(topic, &Payload::FileProcessing(record))
            .await?;
        info!(file_id, topic, "已重新投递");
        Ok(())
    }

    /// 把等待中的记录派发到各自的主题，定时扫描任务调用
    pub async fn dispatch_pending(&self) -> PipelineResult<usize> {
        let pending = self
            .files
            .list(&FileProcessingFilter {
                status: Some(ProcessStatus::Wait),
                ..Default::default()
            })
            .await?;
        let mut dispatched = 0;
        for record in pending {
            let topic = routing::topic_for(&record);
            let file_id = record.file_id.clone();
            match self
                .queue
                .publish_point_to_point(topic, &Payload::FileProcessing(record))
                .await
            {
                Ok(()) => dispatched += 1,
                Err(error) => error!(file_id = %file_id, %error, "派发待处理文件失败"),
            }
        }
        if dispatched > 0 {
            info!(count = dispatched, "派发待处理文件");
        }
        Ok(dispatched)
    }

    pub async fn processors_status(&self) -> Vec<ProcessorStatus> {
        self.registry.snapshot().await
    }

    pub async fn control(&self, action: ControlAction, name: Option<&str>) -> PipelineResult<()> {
        match (action, name) {
            (ControlAction::Start, Some(name)) => self.registry.start(name).await,
            (ControlAction::Start, None) => self.registry.start_all().await,
            (ControlAction::Stop, Some(name)) => self.registry.stop(name).await,
            (ControlAction::Stop, None) => self.registry.stop_all().await,
            (ControlAction::Restart, Some(name)) => {
                self.registry.stop(name).await?;
                self.registry.start(name).await
            }
            (ControlAction::Restart, None) => {
                self.registry.stop_all().await?;
                self.registry.start_all().await
            }
        }
    }

    /// 依赖探测出错为不健康；生产者断连或没有处理器在消费为告警
    pub async fn health_check(&self) -> HealthReport {
        let database_ok = self
            .files
            .count(&FileProcessingFilter::default())
            .await
            .is_ok();
        // 拿不到生产者和拿到但断连是两回事，前者是依赖故障
        let (queue_ok, producer_connected) = match self.queue.producer().await {
            Ok(producer) => (true, producer.is_connected().await),
            Err(error) => {
                warn!(%error, "获取消息生产者失败");
                (false, false)
            }
        };
        let consuming_processors = self.registry.consuming_count().await;

        let state = if !database_ok || !queue_ok {
            HealthState::Unhealthy
        } else if !producer_connected || consuming_processors == 0 {
            HealthState::Warning
        } else {
            HealthState::Healthy
        };
        HealthReport {
            state,
            database_ok,
            producer_connected,
            consuming_processors,
        }
    }
}
