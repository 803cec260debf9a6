use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use filepipe_config::AppConfig;
use filepipe_domain::{
    FileProcessingRepository, KnowledgeMappingRepository, PipelineEventRepository, QueueManager,
    ScheduleRepository,
};
use filepipe_infrastructure::{
    CommandTranscriber, DatabaseManager, LocalFileStorage, LocalKnowledgeIndexer, QueueFactory,
    SqliteFileProcessingRepository, SqliteKnowledgeMappingRepository,
    SqlitePipelineEventRepository, SqliteScheduleRepository,
};
use filepipe_pipeline::{PipelineManager, SchedulerService};
use filepipe_processor::{AudioToTextProcessor, KnowledgeProcessor, ProcessorRegistry};

/// 主应用程序：组装数据库、消息队列、处理器和调度器
pub struct Application {
    database: DatabaseManager,
    queue: Arc<dyn QueueManager>,
    pipeline: Arc<PipelineManager>,
    scheduler: Arc<SchedulerService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        // 数据库与仓储
        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        let pool = database.pool().clone();
        let files: Arc<dyn FileProcessingRepository> =
            Arc::new(SqliteFileProcessingRepository::new(pool.clone()));
        let events: Arc<dyn PipelineEventRepository> =
            Arc::new(SqlitePipelineEventRepository::new(pool.clone()));
        let schedules: Arc<dyn ScheduleRepository> =
            Arc::new(SqliteScheduleRepository::new(pool.clone()));
        let mappings: Arc<dyn KnowledgeMappingRepository> =
            Arc::new(SqliteKnowledgeMappingRepository::new(pool));

        // 消息队列
        let queue = QueueFactory::create(&config.message_queue).context("创建消息队列失败")?;

        // 外部协作方：本地存储与目录型知识库
        let storage = Arc::new(LocalFileStorage::new(&config.pipeline.storage_root));
        let indexer = Arc::new(LocalKnowledgeIndexer::new(
            config.pipeline.knowledge_root(),
            storage.clone(),
        ));

        // 处理器注册
        let registry = Arc::new(ProcessorRegistry::new(events.clone(), queue.clone()));
        registry
            .register(Arc::new(KnowledgeProcessor::new(
                indexer,
                mappings,
                files.clone(),
            )))
            .await;
        match &config.pipeline.transcriber_command {
            Some(command) => {
                let transcriber =
                    Arc::new(CommandTranscriber::new(command).context("解析转写命令失败")?);
                registry
                    .register(Arc::new(AudioToTextProcessor::new(
                        storage,
                        transcriber,
                        files.clone(),
                        queue.clone(),
                    )))
                    .await;
            }
            None => warn!("未配置转写命令，音频处理器不启用"),
        }

        let pipeline = Arc::new(PipelineManager::new(registry, queue.clone(), files.clone()));

        // 定时任务：把等待中的文件派发到各自的主题
        let scheduler = Arc::new(SchedulerService::new(schedules, config.scheduler.clone()));
        let scan_pipeline = pipeline.clone();
        scheduler
            .register(
                "file_scan",
                "文件派发",
                "把等待中的文件记录投递到处理队列",
                config.scheduler.file_scan_interval_seconds as i64,
                true,
                Arc::new(move || {
                    let pipeline = scan_pipeline.clone();
                    Box::pin(async move {
                        pipeline.dispatch_pending().await?;
                        Ok(())
                    })
                }),
            )
            .await;

        Ok(Self {
            database,
            queue,
            pipeline,
            scheduler,
        })
    }

    /// 运行至收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.pipeline.start().await.context("启动流水线失败")?;
        self.scheduler.start().await.context("启动调度器失败")?;

        let health = self.pipeline.health_check().await;
        info!(state = ?health.state, consumers = health.consuming_processors, "系统就绪");

        let _ = shutdown_rx.recv().await;
        info!("开始关闭流水线");

        self.scheduler.stop().await;
        if let Err(e) = self.pipeline.stop().await {
            warn!("停止流水线失败: {e}");
        }
        if let Err(e) = self.queue.shutdown().await {
            warn!("关闭消息队列失败: {e}");
        }
        self.database.close().await;
        info!("应用已关闭");
        Ok(())
    }
}
