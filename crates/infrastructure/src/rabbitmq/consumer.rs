//! RabbitMQ消息消费者
//!
//! 点对点订阅声明同名durable队列并设置prefetch 1；广播订阅声明
//! fanout交换机并绑定一条独占匿名队列。投递循环以1秒为切片轮询，
//! 停止标志因此能及时生效。回调派发后即确认；解码失败的消息
//! 以不重投方式拒绝。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use filepipe_domain::{Message, MessageConsumer, MessageHandler};
use filepipe_errors::{PipelineError, PipelineResult};

use crate::dispatch::HandlerDispatcher;

enum SubscriptionKind {
    PointToPoint,
    Fanout,
}

struct Subscription {
    topic: String,
    kind: SubscriptionKind,
    handler: Arc<dyn MessageHandler>,
}

struct ConsumerState {
    connection: Connection,
    channel: Channel,
}

pub struct RabbitMqConsumer {
    url: String,
    consumer_id: String,
    state: Mutex<Option<ConsumerState>>,
    subscriptions: Mutex<Vec<Subscription>>,
    running: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    dispatcher: HandlerDispatcher,
    consuming: AtomicBool,
}

impl RabbitMqConsumer {
    pub fn new(url: String, consumer_id: String) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            url,
            consumer_id,
            state: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            running,
            tasks: Mutex::new(Vec::new()),
            dispatcher: HandlerDispatcher::default(),
            consuming: AtomicBool::new(false),
        }
    }

    /// 按订阅类型声明队列，返回实际消费的队列名
    async fn bind_queue(
        &self,
        channel: &Channel,
        subscription: &Subscription,
    ) -> PipelineResult<String> {
        match subscription.kind {
            SubscriptionKind::PointToPoint => {
                channel
                    .queue_declare(
                        &subscription.topic,
                        QueueDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        PipelineError::MessageQueue(format!(
                            "声明队列 {} 失败: {e}",
                            subscription.topic
                        ))
                    })?;
                // prefetch 1，公平分发
                channel
                    .basic_qos(1, BasicQosOptions::default())
                    .await
                    .map_err(|e| PipelineError::MessageQueue(format!("设置qos失败: {e}")))?;
                Ok(subscription.topic.clone())
            }
            SubscriptionKind::Fanout => {
                channel
                    .exchange_declare(
                        &subscription.topic,
                        ExchangeKind::Fanout,
                        ExchangeDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        PipelineError::MessageQueue(format!(
                            "声明交换机 {} 失败: {e}",
                            subscription.topic
                        ))
                    })?;
                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        PipelineError::MessageQueue(format!("声明匿名队列失败: {e}"))
                    })?;
                channel
                    .queue_bind(
                        queue.name().as_str(),
                        &subscription.topic,
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        PipelineError::MessageQueue(format!(
                            "绑定队列到交换机 {} 失败: {e}",
                            subscription.topic
                        ))
                    })?;
                Ok(queue.name().as_str().to_string())
            }
        }
    }
}

#[async_trait]
impl MessageConsumer for RabbitMqConsumer {
    async fn connect(&self) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.as_ref() {
            if existing.connection.status().connected() {
                return Ok(());
            }
        }
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("创建通道失败: {e}")))?;
        info!(consumer_id = %self.consumer_id, "消费者已连接到RabbitMQ");
        *state = Some(ConsumerState {
            connection,
            channel,
        });
        Ok(())
    }

    async fn disconnect(&self) -> PipelineResult<()> {
        self.stop_consuming().await?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.take() {
            if let Err(e) = existing.connection.close(200, "正常关闭").await {
                warn!("关闭消费者连接失败: {e}");
            }
        }
        Ok(())
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
        self.connect().await?;
        self.running.send_replace(true);

        let state = self.state.lock().await;
        let channel = match state.as_ref() {
            Some(s) => s.channel.clone(),
            None => {
                self.consuming.store(false, Ordering::SeqCst);
                return Err(PipelineError::MessageQueue("消费者未连接".to_string()));
            }
        };

        let subscriptions = self.subscriptions.lock().await;
        let mut tasks = self.tasks.lock().await;
        for (index, subscription) in subscriptions.iter().enumerate() {
            let queue_name = self.bind_queue(&channel, subscription).await?;
            let tag = format!("{}-{}", self.consumer_id, index);
            let mut lapin_consumer = channel
                .basic_consume(
                    &queue_name,
                    &tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PipelineError::MessageQueue(format!("创建消费者 {tag} 失败: {e}"))
                })?;

            let topic = subscription.topic.clone();
            let handler = subscription.handler.clone();
            let dispatcher = self.dispatcher.clone();
            let running = self.running.subscribe();

            tasks.push(tokio::spawn(async move {
                loop {
                    if !*running.borrow() {
                        break;
                    }
                    let next = tokio::time::timeout(
                        Duration::from_secs(1),
                        lapin_consumer.next(),
                    )
                    .await;
                    match next {
                        Err(_) => continue,
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            error!(topic, "接收消息失败: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        Ok(Some(Ok(delivery))) => {
                            match Message::deserialize_bytes(&delivery.data) {
                                Ok(message) => {
                                    // 派发即确认；回调失败由回调自身留痕，不重投
                                    let handler = handler.clone();
                                    let dispatcher = dispatcher.clone();
                                    let message_id = message.id.clone();
                                    let task_topic = topic.clone();
                                    tokio::spawn(async move {
                                        if let Err(e) =
                                            dispatcher.dispatch(handler, message).await
                                        {
                                            error!(
                                                topic = %task_topic,
                                                message_id = %message_id,
                                                "消息处理失败: {e}"
                                            );
                                        }
                                    });
                                    if let Err(e) =
                                        delivery.acker.ack(BasicAckOptions::default()).await
                                    {
                                        error!(topic, "确认消息失败: {e}");
                                    }
                                }
                                Err(e) => {
                                    error!(topic, "消息解码失败，拒绝且不重投: {e}");
                                    if let Err(nack_err) = delivery
                                        .acker
                                        .nack(BasicNackOptions {
                                            requeue: false,
                                            ..Default::default()
                                        })
                                        .await
                                    {
                                        error!(topic, "拒绝消息失败: {nack_err}");
                                    }
                                }
                            }
                        }
                    }
                }
            }));
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
