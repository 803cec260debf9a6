//! 内存消息传输
//!
//! 使用 Tokio channels 实现的进程内传输，适用于嵌入式部署和测试。
//! 点对点主题是一条共享通道，多个消费者竞争消费（工作队列语义）；
//! 广播主题为每个订阅者保留一条独占通道。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use filepipe_config::MessageQueueConfig;
use filepipe_domain::{
    publish_with_retry, Message, MessageConsumer, MessageHandler, MessagePattern, MessageProducer,
    Payload, QueueManager, RetryPolicy,
};
use filepipe_errors::{PipelineError, PipelineResult};

use crate::dispatch::HandlerDispatcher;

struct P2pTopic {
    sender: mpsc::UnboundedSender<Message>,
    /// 共享接收端，竞争消费
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
}

/// 进程内消息代理，按主题路由
#[derive(Default)]
pub struct InMemoryBroker {
    p2p: RwLock<HashMap<String, P2pTopic>>,
    fanout: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    async fn publish(&self, message: &Message) -> PipelineResult<()> {
        match message.pattern {
            MessagePattern::PointToPoint | MessagePattern::RequestResponse => {
                let sender = self.p2p_sender(&message.topic).await;
                sender.send(message.clone()).map_err(|e| {
                    PipelineError::MessageQueue(format!(
                        "主题 '{}' 投递失败: {e}",
                        message.topic
                    ))
                })?;
            }
            MessagePattern::Broadcast | MessagePattern::PublishSubscribe => {
                let mut subscribers = self.fanout.write().await;
                let senders = subscribers.entry(message.topic.clone()).or_default();
                // 清除已断开的订阅者，消息复制给其余所有人
                senders.retain(|s| s.send(message.clone()).is_ok());
                debug!(
                    topic = %message.topic,
                    subscribers = senders.len(),
                    "广播消息已分发"
                );
            }
        }
        Ok(())
    }

    async fn p2p_sender(&self, topic: &str) -> mpsc::UnboundedSender<Message> {
        self.p2p_topic(topic).await.0
    }

    /// 共享接收端，消息在订阅同一主题的消费者之间分配
    async fn p2p_receiver(&self, topic: &str) -> Arc<Mutex<mpsc::UnboundedReceiver<Message>>> {
        self.p2p_topic(topic).await.1
    }

    async fn p2p_topic(
        &self,
        topic: &str,
    ) -> (
        mpsc::UnboundedSender<Message>,
        Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    ) {
        {
            let topics = self.p2p.read().await;
            if let Some(t) = topics.get(topic) {
                return (t.sender.clone(), t.receiver.clone());
            }
        }
        let mut topics = self.p2p.write().await;
        let t = topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic, "创建点对点主题");
            let (sender, receiver) = mpsc::unbounded_channel();
            P2pTopic {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            }
        });
        (t.sender.clone(), t.receiver.clone())
    }

    /// 为订阅者绑定一条独占的广播通道
    async fn bind_fanout(&self, topic: &str) -> mpsc::UnboundedReceiver<Message> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.fanout
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        receiver
    }
}

/// 内存消息生产者
pub struct InMemoryProducer {
    broker: Arc<InMemoryBroker>,
    connected: AtomicBool,
}

impl InMemoryProducer {
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageProducer for InMemoryProducer {
    async fn connect(&self) -> PipelineResult<bool> {
        Ok(!self.connected.swap(true, Ordering::SeqCst))
    }

    async fn disconnect(&self) -> PipelineResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: &Message) -> PipelineResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PipelineError::MessageQueue("生产者未连接".to_string()));
        }
        self.broker.publish(message).await
    }

    async fn request(
        &self,
        message: &Message,
        timeout: Duration,
    ) -> PipelineResult<Option<Message>> {
        let reply_topic = message
            .reply_to
            .clone()
            .ok_or_else(|| PipelineError::validation_error("请求消息缺少reply_to"))?;
        let correlation_id = message
            .correlation_id
            .clone()
            .ok_or_else(|| PipelineError::validation_error("请求消息缺少correlation_id"))?;

        // 先确认回复主题存在再发布，避免应答落在主题创建之前
        let receiver = self.broker.p2p_receiver(&reply_topic).await;
        self.publish(message).await?;

        let waiter = async {
            loop {
                let candidate = { receiver.lock().await.recv().await };
                match candidate {
                    Some(reply)
                        if reply.correlation_id.as_deref() == Some(correlation_id.as_str()) =>
                    {
                        return Some(reply)
                    }
                    Some(other) => {
                        warn!(
                            message_id = %other.id,
                            "回复队列中的消息关联ID不匹配，丢弃"
                        );
                    }
                    None => return None,
                }
            }
        };

        match tokio::time::timeout(timeout, waiter).await {
            Ok(reply) => Ok(reply),
            Err(_) => Ok(None),
        }
    }
}

enum SubscriptionKind {
    PointToPoint,
    Fanout,
}

struct Subscription {
    topic: String,
    kind: SubscriptionKind,
    handler: Arc<dyn MessageHandler>,
}

/// 内存消息消费者
///
/// 投递循环逐条拉取，等待回调完成后再取下一条，
/// 单消费者场景下严格保持发布顺序。
pub struct InMemoryConsumer {
    broker: Arc<InMemoryBroker>,
    consumer_id: String,
    subscriptions: Mutex<Vec<Subscription>>,
    running: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    dispatcher: HandlerDispatcher,
    consuming: AtomicBool,
}

impl InMemoryConsumer {
    pub fn new(broker: Arc<InMemoryBroker>, consumer_id: String) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            broker,
            consumer_id,
            subscriptions: Mutex::new(Vec::new()),
            running,
            tasks: Mutex::new(Vec::new()),
            dispatcher: HandlerDispatcher::default(),
            consuming: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn connect(&self) -> PipelineResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> PipelineResult<()> {
        self.stop_consuming().await
    }

    async fn subscribe_point_to_point(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> PipelineResult<()> {
        self.subscriptions.lock().await.push(Subscription {
            topic: topic.to_string(),
            kind: SubscriptionKind::PointToPoint,
            handler,
        });
        debug!(consumer_id = %self.consumer_id, topic, "订阅点对点主题");
        Ok(())
    }

    async fn subscribe_publish_subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> PipelineResult<()> {
        self.subscriptions.lock().await.push(Subscription {
            topic: topic.to_string(),
            kind: SubscriptionKind::Fanout,
            handler,
        });
        debug!(consumer_id = %self.consumer_id, topic, "订阅广播主题");
        Ok(())
    }

    async fn start_consuming(&self) -> PipelineResult<()> {
        if self.consuming.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.running.send_replace(true);

        let subscriptions = self.subscriptions.lock().await;
        let mut tasks = self.tasks.lock().await;
        for subscription in subscriptions.iter() {
            let topic = subscription.topic.clone();
            let handler = subscription.handler.clone();
            let dispatcher = self.dispatcher.clone();
            let running = self.running.subscribe();
            let consumer_id = self.consumer_id.clone();

            let handle = match subscription.kind {
                SubscriptionKind::PointToPoint => {
                    let receiver = self.broker.p2p_receiver(&topic).await;
                    tokio::spawn(async move {
                        run_p2p_loop(topic, receiver, handler, dispatcher, running, consumer_id)
                            .await;
                    })
                }
                SubscriptionKind::Fanout => {
                    let receiver = self.broker.bind_fanout(&topic).await;
                    tokio::spawn(async move {
                        run_fanout_loop(topic, receiver, handler, dispatcher, running, consumer_id)
                            .await;
                    })
                }
            };
            tasks.push(handle);
        }

        info!(consumer_id = %self.consumer_id, count = tasks.len(), "消费循环已启动");
        Ok(())
    }

    async fn stop_consuming(&self) -> PipelineResult<()> {
        if !self.consuming.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.running.send_replace(false);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                warn!(consumer_id = %self.consumer_id, "消费任务未在限期内退出");
            }
        }
        info!(consumer_id = %self.consumer_id, "消费循环已停止");
        Ok(())
    }

    async fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }
}

async fn run_p2p_loop(
    topic: String,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    handler: Arc<dyn MessageHandler>,
    dispatcher: HandlerDispatcher,
    running: watch::Receiver<bool>,
    consumer_id: String,
) {
    loop {
        if !*running.borrow() {
            break;
        }
        // 1秒切片轮询，保证停止标志及时生效
        let pulled = {
            let mut rx = receiver.lock().await;
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await
        };
        match pulled {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => {
                dispatch_one(&topic, &consumer_id, &dispatcher, handler.clone(), message).await;
            }
        }
    }
}

async fn run_fanout_loop(
    topic: String,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    handler: Arc<dyn MessageHandler>,
    dispatcher: HandlerDispatcher,
    running: watch::Receiver<bool>,
    consumer_id: String,
) {
    loop {
        if !*running.borrow() {
            break;
        }
        match tokio::time::timeout(Duration::from_secs(1), receiver.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => {
                dispatch_one(&topic, &consumer_id, &dispatcher, handler.clone(), message).await;
            }
        }
    }
}

async fn dispatch_one(
    topic: &str,
    consumer_id: &str,
    dispatcher: &HandlerDispatcher,
    handler: Arc<dyn MessageHandler>,
    message: Message,
) {
    let message_id = message.id.clone();
    if let Err(e) = dispatcher.dispatch(handler, message).await {
        // 回调失败不重投，由回调自身负责留痕
        error!(topic, consumer_id, message_id = %message_id, "消息处理失败: {e}");
    }
}

/// 内存队列管理器
pub struct InMemoryQueueManager {
    broker: Arc<InMemoryBroker>,
    config: MessageQueueConfig,
    producer: Mutex<Option<Arc<InMemoryProducer>>>,
    consumers: Mutex<Vec<Arc<InMemoryConsumer>>>,
    retry_policy: RetryPolicy,
}

impl InMemoryQueueManager {
    pub fn new(config: MessageQueueConfig) -> Self {
        let retry_policy = RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        };
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            config,
            producer: Mutex::new(None),
            consumers: Mutex::new(Vec::new()),
            retry_policy,
        }
    }

    async fn singleton_producer(&self) -> PipelineResult<Arc<InMemoryProducer>> {
        let mut guard = self.producer.lock().await;
        if let Some(producer) = guard.as_ref() {
            return Ok(producer.clone());
        }
        let producer = Arc::new(InMemoryProducer::new(self.broker.clone()));
        producer.connect().await?;
        *guard = Some(producer.clone());
        Ok(producer)
    }

    async fn new_consumer(&self, consumer_id: Option<String>) -> Arc<InMemoryConsumer> {
        let id = consumer_id
            .unwrap_or_else(|| format!("consumer_{}", &uuid::Uuid::new_v4().to_string()[..8]));
        let consumer = Arc::new(InMemoryConsumer::new(self.broker.clone(), id));
        self.consumers.lock().await.push(consumer.clone());
        consumer
    }
}

#[async_trait]
impl QueueManager for InMemoryQueueManager {
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
        consumer.subscribe_publish_subscribe(topic, handler).await?;
        consumer.start_consuming().await?;
        Ok(consumer)
    }

    async fn shutdown(&self) -> PipelineResult<()> {
        info!(queue_type = self.config.get_type_string(), "关闭队列管理器");
        // 先停全部消费者，再断开生产者
        let consumers = {
            let mut guard = self.consumers.lock().await;
            guard.drain(..).collect::<Vec<_>>()
        };
        for consumer in consumers {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("停止消费者失败: {e}");
            }
        }
        if let Some(producer) = self.producer.lock().await.take() {
            producer.disconnect().await?;
        }
        Ok(())
    }
}
