//! 间隔调度
//!
//! 任务注册时带默认间隔和开关，首次启动写入配置表；
//! 之后以数据库里的配置为准，每一圈重新读取，运维调整
//! 无需重启进程。每次执行都留一条历史记录。

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use filepipe_config::models::SchedulerConfig;
use filepipe_domain::{ScheduleRepository, TaskConfig, TaskExecution};
use filepipe_errors::PipelineResult;

pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, PipelineResult<()>> + Send + Sync>;

pub struct TaskDefinition {
    pub task_id: String,
    pub task_name: String,
    pub description: String,
    pub default_interval_seconds: i64,
    pub default_enabled: bool,
    run: TaskFn,
}

pub struct SchedulerService {
    repository: Arc<dyn ScheduleRepository>,
    config: SchedulerConfig,
    definitions: Mutex<Vec<TaskDefinition>>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl SchedulerService {
    pub fn new(repository: Arc<dyn ScheduleRepository>, config: SchedulerConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            repository,
            config,
            definitions: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            stop,
        }
    }

    pub async fn register(
        &self,
        task_id: &str,
        task_name: &str,
        description: &str,
        default_interval_seconds: i64,
        default_enabled: bool,
        run: TaskFn,
    ) {
        self.definitions.lock().await.push(TaskDefinition {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            description: description.to_string(),
            default_interval_seconds,
            default_enabled,
            run,
        });
    }

    pub async fn start(&self) -> PipelineResult<()> {
        if !self.config.enabled {
            info!("调度器已在配置中停用");
            return Ok(());
        }
        let definitions = self.definitions.lock().await;
        let mut handles = self.handles.lock().await;
        for definition in definitions.iter() {
            // 首次注册写默认值，已有任务只刷新名称和描述
            self.repository
                .save_task(&TaskConfig::new(
                    definition.task_id.clone(),
                    definition.task_name.clone(),
                    definition.description.clone(),
                    definition.default_interval_seconds,
                    definition.default_enabled,
                ))
                .await?;

            let task_id = definition.task_id.clone();
            let run = definition.run.clone();
            let repository = self.repository.clone();
            let fallback_interval = definition.default_interval_seconds;
            let mut stop_rx = self.stop.subscribe();
            handles.push(tokio::spawn(async move {
                run_task_loop(task_id, run, repository, fallback_interval, &mut stop_rx).await;
            }));
        }
        info!(tasks = handles.len(), "调度器已启动");
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("调度任务未在期限内退出");
            }
        }
        info!("调度器已停止");
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        enabled: Option<bool>,
        interval_seconds: Option<i64>,
    ) -> PipelineResult<TaskConfig> {
        self.repository
            .update_task(task_id, enabled, interval_seconds)
            .await
    }

    pub async fn list_tasks(&self) -> PipelineResult<Vec<TaskConfig>> {
        self.repository.list_tasks().await
    }

    pub async fn executions(&self, task_id: &str) -> PipelineResult<Vec<TaskExecution>> {
        self.repository
            .executions(task_id, self.config.execution_history_limit)
            .await
    }
}

async fn run_task_loop(
    task_id: String,
    run: TaskFn,
    repository: Arc<dyn ScheduleRepository>,
    fallback_interval: i64,
    stop_rx: &mut watch::Receiver<bool>,
) {
    loop {
        // 每一圈读最新配置，间隔和开关的调整下一圈生效
        let (interval, enabled) = match repository.get_task(&task_id).await {
            Ok(Some(task)) => (task.interval_seconds.max(1), task.enabled),
            Ok(None) => (fallback_interval.max(1), true),
            Err(error) => {
                error!(task_id = %task_id, %error, "读取任务配置失败");
                (fallback_interval.max(1), false)
            }
        };

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = sleep(Duration::from_secs(interval as u64)) => {}
        }
        if !enabled {
            continue;
        }

        let mut execution = TaskExecution::started(task_id.clone());
        let result = (run)().await;
        if let Err(error) = &result {
            warn!(task_id = %task_id, %error, "任务执行失败");
        }
        execution.finish(result.map_err(|e| e.to_string()));
        if let Err(error) = repository.record_execution(&execution).await {
            error!(task_id = %task_id, %error, "记录任务执行历史失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_domain::TaskExecutionStatus;
    use filepipe_errors::PipelineError;
    use filepipe_testing_utils::MockScheduleRepository;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler(repository: Arc<MockScheduleRepository>) -> SchedulerService {
        SchedulerService::new(
            repository,
            SchedulerConfig {
                enabled: true,
                file_scan_interval_seconds: 300,
                execution_history_limit: 50,
            },
        )
    }

    fn counting_task(counter: Arc<AtomicU32>) -> TaskFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_on_interval_and_records_history() {
        let repository = Arc::new(MockScheduleRepository::new());
        let service = scheduler(repository.clone());
        let counter = Arc::new(AtomicU32::new(0));
        service
            .register("tick", "计数", "测试任务", 10, true, counting_task(counter.clone()))
            .await;
        service.start().await.unwrap();

        sleep(Duration::from_secs(25)).await;
        service.stop().await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        let history = service.executions("tick").await.unwrap();
        assert!(history.len() >= 2);
        assert!(history
            .iter()
            .all(|e| e.status == TaskExecutionStatus::Success && e.end_time.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_recorded_with_message() {
        let repository = Arc::new(MockScheduleRepository::new());
        let service = scheduler(repository.clone());
        let failing: TaskFn = Arc::new(|| {
            Box::pin(async { Err(PipelineError::Internal("下游超时".to_string())) })
        });
        service
            .register("flaky", "失败任务", "测试任务", 10, true, failing)
            .await;
        service.start().await.unwrap();

        sleep(Duration::from_secs(15)).await;
        service.stop().await;

        let history = service.executions("flaky").await.unwrap();
        assert!(!history.is_empty());
        assert_eq!(history[0].status, TaskExecutionStatus::Failed);
        assert!(history[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("下游超时"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_takes_effect_next_lap() {
        let repository = Arc::new(MockScheduleRepository::new());
        let service = scheduler(repository.clone());
        let counter = Arc::new(AtomicU32::new(0));
        service
            .register("tick", "计数", "测试任务", 1000, true, counting_task(counter.clone()))
            .await;
        service.start().await.unwrap();

        // 注册间隔是1000秒，调成5秒后同样的时间窗内跑了多轮
        service.update_task("tick", None, Some(5)).await.unwrap();
        sleep(Duration::from_secs(1100)).await;
        service.stop().await;
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_task_skips_runs() {
        let repository = Arc::new(MockScheduleRepository::new());
        let service = scheduler(repository.clone());
        let counter = Arc::new(AtomicU32::new(0));
        service
            .register("tick", "计数", "测试任务", 10, true, counting_task(counter.clone()))
            .await;
        service.start().await.unwrap();
        service.update_task("tick", Some(false), None).await.unwrap();

        sleep(Duration::from_secs(50)).await;
        service.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_spawns_nothing() {
        let repository = Arc::new(MockScheduleRepository::new());
        let service = SchedulerService::new(
            repository.clone(),
            SchedulerConfig {
                enabled: false,
                file_scan_interval_seconds: 300,
                execution_history_limit: 50,
            },
        );
        let counter = Arc::new(AtomicU32::new(0));
        service
            .register("tick", "计数", "测试任务", 1, true, counting_task(counter.clone()))
            .await;
        service.start().await.unwrap();
        assert!(service.handles.lock().await.is_empty());
    }
}
