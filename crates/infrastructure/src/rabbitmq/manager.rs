//! RabbitMQ队列管理器
//!
//! 生产者是惰性单例；每个订阅对应一个独立消费者连接。
//! 关闭顺序固定：先停全部消费者，再断开生产者。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use filepipe_config::MessageQueueConfig;
use filepipe_domain::{
    publish_with_retry, Message, MessageConsumer, MessageHandler, MessageProducer, Payload,
    QueueManager, RetryPolicy,
};
use filepipe_errors::PipelineResult;

use super::{RabbitMqConsumer, RabbitMqProducer};

pub struct RabbitMqManager {
    config: MessageQueueConfig,
    producer: Mutex<Option<Arc<RabbitMqProducer>>>,
    consumers: Mutex<Vec<Arc<RabbitMqConsumer>>>,
    retry_policy: RetryPolicy,
}

impl RabbitMqManager {
    pub fn new(config: MessageQueueConfig) -> Self {
        let retry_policy = RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        };
        Self {
            config,
            producer: Mutex::new(None),
            consumers: Mutex::new(Vec::new()),
            retry_policy,
        }
    }

    async fn singleton_producer(&self) -> PipelineResult<Arc<RabbitMqProducer>> {
        let mut guard = self.producer.lock().await;
        if let Some(producer) = guard.as_ref() {
            return Ok(producer.clone());
        }
        let producer = Arc::new(RabbitMqProducer::new(self.config.url.clone()));
        producer.connect().await?;
        *guard = Some(producer.clone());
        Ok(producer)
    }

    async fn new_consumer(&self, consumer_id: Option<String>) -> Arc<RabbitMqConsumer> {
        let id = consumer_id
            .unwrap_or_else(|| format!("consumer_{}", &uuid::Uuid::new_v4().to_string()[..8]));
        let consumer = Arc::new(RabbitMqConsumer::new(self.config.url.clone(), id));
        self.consumers.lock().await.push(consumer.clone());
        consumer
    }
}

#[async_trait]
impl QueueManager for RabbitMqManager {
    async fn producer(&self) -> PipelineResult<Arc<dyn MessageProducer>> {
        let producer: Arc<dyn MessageProducer> = self.singleton_producer().await?;
        Ok(producer)
    }

    async fn create_consumer(
        &self,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>> {
        let consumer: Arc<dyn MessageConsumer> = self.new_consumer(consumer_id).await;
        Ok(consumer)
    }

    async fn publish_point_to_point(&self, topic: &str, payload: &Payload) -> PipelineResult<()> {
        let message = Message::point_to_point(topic, payload)?;
        let producer = self.singleton_producer().await?;
        publish_with_retry(producer.as_ref(), &message, &self.retry_policy).await
    }

    async fn publish_broadcast(&self, topic: &str, payload: &Payload) -> PipelineResult<()> {
        let message = Message::broadcast(topic, payload)?;
        let producer = self.singleton_producer().await?;
        publish_with_retry(producer.as_ref(), &message, &self.retry_policy).await
    }

    async fn subscribe_point_to_point(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>> {
        let consumer = self.new_consumer(consumer_id).await;
        consumer.connect().await?;
        consumer.subscribe_point_to_point(topic, handler).await?;
        consumer.start_consuming().await?;
        Ok(consumer)
    }

    async fn subscribe_broadcast(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>> {
        let consumer = self.new_consumer(consumer_id).await;
        consumer.connect().await?;
        consumer.subscribe_publish_subscribe(topic, handler).await?;
        consumer.start_consuming().await?;
        Ok(consumer)
    }

    async fn shutdown(&self) -> PipelineResult<()> {
        info!("关闭RabbitMQ队列管理器");
        let consumers = {
            let mut guard = self.consumers.lock().await;
            guard.drain(..).collect::<Vec<_>>()
        };
        for consumer in consumers {
            if let Err(e) = consumer.disconnect().await {
                warn!("停止消费者失败: {e}");
            }
        }
        if let Some(producer) = self.producer.lock().await.take() {
            producer.disconnect().await?;
        }
        Ok(())
    }
}
