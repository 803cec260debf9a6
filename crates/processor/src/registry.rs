//! 处理器注册中心
//!
//! 按名字管理处理器，负责把每个处理器挂到它声明的队列主题上，
//! 并跟踪订阅生命周期。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use filepipe_domain::{MessageConsumer, PipelineEventRepository, QueueManager};
use filepipe_errors::{PipelineError, PipelineResult};

use crate::dispatcher::ProcessorDispatcher;
use crate::processor::{Processor, ProcessorStatsSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub topic: String,
    pub enabled: bool,
    pub consuming: bool,
    pub stats: ProcessorStatsSnapshot,
}

struct ActiveSubscription {
    name: String,
    consumer: Arc<dyn MessageConsumer>,
}

pub struct ProcessorRegistry {
    processors: Mutex<HashMap<String, Arc<dyn Processor>>>,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
    events: Arc<dyn PipelineEventRepository>,
    queue: Arc<dyn QueueManager>,
}

impl ProcessorRegistry {
    pub fn new(
        events: Arc<dyn PipelineEventRepository>,
        queue: Arc<dyn QueueManager>,
    ) -> Self {
        Self {
            processors: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            events,
            queue,
        }
    }

    /// 注册处理器，同名覆盖
    pub async fn register(&self, processor: Arc<dyn Processor>) {
        let name = processor.name().to_string();
        let previous = self
            .processors
            .lock()
            .await
            .insert(name.clone(), processor);
        if previous.is_some() {
            warn!(processor = %name, "同名处理器被覆盖");
        } else {
            info!(processor = %name, "注册处理器");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.lock().await.get(name).cloned()
    }

    /// 为单个处理器建立订阅
    pub async fn start(&self, name: &str) -> PipelineResult<()> {
        let processor = self
            .get(name)
            .await
            .ok_or_else(|| PipelineError::processor_not_found(name))?;

        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.iter().any(|s| s.name == name) {
            return Ok(());
        }
        let dispatcher = Arc::new(ProcessorDispatcher::new(
            processor.clone(),
            self.events.clone(),
        ));
        let consumer = self
            .queue
            .subscribe_point_to_point(
                processor.topic(),
                dispatcher,
                Some(format!("{name}-consumer")),
            )
            .await?;
        subscriptions.push(ActiveSubscription {
            name: name.to_string(),
            consumer,
        });
        info!(processor = name, topic = processor.topic(), "处理器已启动");
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> PipelineResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(index) = subscriptions.iter().position(|s| s.name == name) else {
            return Ok(());
        };
        let subscription = subscriptions.remove(index);
        subscription.consumer.disconnect().await?;
        info!(processor = name, "处理器已停止");
        Ok(())
    }

    pub async fn start_all(&self) -> PipelineResult<()> {
        let names: Vec<String> = self.processors.lock().await.keys().cloned().collect();
        for name in names {
            self.start(&name).await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> PipelineResult<()> {
        let names: Vec<String> = {
            let subscriptions = self.subscriptions.lock().await;
            subscriptions.iter().map(|s| s.name.clone()).collect()
        };
        for name in names {
            self.stop(&name).await?;
        }
        Ok(())
    }

    pub async fn consuming_count(&self) -> usize {
        let subscriptions = self.subscriptions.lock().await;
        let mut count = 0;
        for subscription in subscriptions.iter() {
            if subscription.consumer.is_consuming().await {
                count += 1;
            }
        }
        count
    }

    pub async fn snapshot(&self) -> Vec<ProcessorStatus> {
        let processors = self.processors.lock().await;
        let subscriptions = self.subscriptions.lock().await;
        let mut statuses = Vec::with_capacity(processors.len());
        for (name, processor) in processors.iter() {
            let consuming = match subscriptions.iter().find(|s| &s.name == name) {
                Some(subscription) => subscription.consumer.is_consuming().await,
                None => false,
            };
            statuses.push(ProcessorStatus {
                name: name.clone(),
                topic: processor.topic().to_string(),
                enabled: processor.is_enabled(),
                consuming,
                stats: processor.stats().snapshot(),
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}
