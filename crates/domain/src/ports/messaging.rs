//! 消息传输端口
//!
//! 生产者/消费者/队列管理器的抽象接口，由infrastructure层实现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::messaging::{Message, Payload};
use filepipe_errors::{PipelineError, PipelineResult};

/// 回调执行方式
///
/// 处理器自行声明能力，投递层据此选择执行环境，
/// 不做任何运行时探测。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 直接在异步运行时上执行
    Async,
    /// 通过阻塞线程池执行，受工作池容量限制
    Blocking,
}

/// 消息处理回调
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }
    async fn handle(&self, message: Message) -> PipelineResult<()>;
}

/// 消息生产者
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// 建立连接，返回是否新建了连接
    async fn connect(&self) -> PipelineResult<bool>;
    async fn disconnect(&self) -> PipelineResult<()>;
    async fn is_connected(&self) -> bool;
    async fn publish(&self, message: &Message) -> PipelineResult<()>;
    /// 请求-应答：发布请求并轮询回复队列直到超时
    async fn request(
        &self,
        message: &Message,
        timeout: Duration,
    ) -> PipelineResult<Option<Message>>;
}

/// 消息消费者
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn connect(&self) -> PipelineResult<()>;
    async fn disconnect(&self) -> PipelineResult<()>;
    async fn subscribe_point_to_point(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> PipelineResult<()>;
    async fn subscribe_publish_subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> PipelineResult<()>;
    async fn start_consuming(&self) -> PipelineResult<()>;
    async fn stop_consuming(&self) -> PipelineResult<()>;
    async fn is_consuming(&self) -> bool;
}

/// 队列管理器门面
///
/// 生产者是惰性单例；shutdown时先停全部消费者再断开生产者。
#[async_trait]
pub trait QueueManager: Send + Sync {
    async fn producer(&self) -> PipelineResult<Arc<dyn MessageProducer>>;
    async fn create_consumer(
        &self,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>>;
    async fn publish_point_to_point(&self, topic: &str, payload: &Payload) -> PipelineResult<()>;
    async fn publish_broadcast(&self, topic: &str, payload: &Payload) -> PipelineResult<()>;
    async fn subscribe_point_to_point(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>>;
    async fn subscribe_broadcast(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        consumer_id: Option<String>,
    ) -> PipelineResult<Arc<dyn MessageConsumer>>;
    async fn shutdown(&self) -> PipelineResult<()>;
}

/// 发布重试策略，延迟按指数递增
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// 带退避的发布
///
/// 每次尝试前校验连接（断开则重连）；失败后断开连接、
/// 休眠当前延迟并加倍；共尝试 `max_retries + 1` 次。
pub async fn publish_with_retry(
    producer: &dyn MessageProducer,
    message: &Message,
    policy: &RetryPolicy,
) -> PipelineResult<()> {
    let mut delay = policy.retry_delay;
    let mut last_error: Option<PipelineError> = None;

    for attempt in 0..=policy.max_retries {
        if !producer.is_connected().await {
            if let Err(e) = producer.connect().await {
                tracing::warn!(
                    message_id = %message.id,
                    attempt,
                    "重连失败: {e}"
                );
                last_error = Some(e);
                if attempt < policy.max_retries {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                continue;
            }
        }

        match producer.publish(message).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(message_id = %message.id, attempt, "重试发布成功");
                }
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    topic = %message.topic,
                    attempt,
                    "发布失败: {e}"
                );
                let _ = producer.disconnect().await;
                last_error = Some(e);
                if attempt < policy.max_retries {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| PipelineError::MessageQueue("发布重试次数耗尽".to_string())))
}
