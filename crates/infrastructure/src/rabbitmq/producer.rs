//! RabbitMQ消息生产者
//!
//! 广播主题对应同名的durable fanout交换机，点对点主题对应同名的
//! durable队列；消息以持久化模式(delivery mode 2)发布并等待发布确认。

use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, types::ShortString, BasicProperties, Channel, Connection,
    ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use filepipe_domain::{Message, MessagePattern, MessageProducer};
use filepipe_errors::{PipelineError, PipelineResult};

struct ProducerState {
    connection: Connection,
    channel: Channel,
}

pub struct RabbitMqProducer {
    url: String,
    state: Mutex<Option<ProducerState>>,
}

impl RabbitMqProducer {
    pub fn new(url: String) -> Self {
        Self {
            url,
            state: Mutex::new(None),
        }
    }

    async fn declare_destination(&self, channel: &Channel, message: &Message) -> PipelineResult<()> {
        match message.pattern {
            MessagePattern::Broadcast | MessagePattern::PublishSubscribe => {
                channel
                    .exchange_declare(
                        &message.topic,
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
                            message.topic
                        ))
                    })?;
            }
            MessagePattern::PointToPoint | MessagePattern::RequestResponse => {
                channel
                    .queue_declare(
                        &message.topic,
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
                            message.topic
                        ))
                    })?;
            }
        }
        Ok(())
    }

    fn properties(message: &Message) -> BasicProperties {
        let mut props = BasicProperties::default().with_delivery_mode(2); // 2 = persistent
        if let Some(reply_to) = &message.reply_to {
            props = props.with_reply_to(ShortString::from(reply_to.clone()));
        }
        if let Some(correlation_id) = &message.correlation_id {
            props = props.with_correlation_id(ShortString::from(correlation_id.clone()));
        }
        props
    }

    async fn publish_on(&self, channel: &Channel, message: &Message) -> PipelineResult<()> {
        self.declare_destination(channel, message).await?;

        let payload = message
            .serialize_bytes()
            .map_err(|e| PipelineError::Serialization(format!("序列化消息失败: {e}")))?;

        let (exchange, routing_key) = match message.pattern {
            MessagePattern::Broadcast | MessagePattern::PublishSubscribe => {
                (message.topic.as_str(), "")
            }
            MessagePattern::PointToPoint | MessagePattern::RequestResponse => {
                ("", message.topic.as_str())
            }
        };

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                Self::properties(message),
            )
            .await
            .map_err(|e| {
                PipelineError::MessageQueue(format!("发布消息到 {} 失败: {e}", message.topic))
            })?;

        // 等待发布确认
        confirm
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!(message_id = %message.id, topic = %message.topic, "消息已发布");
        Ok(())
    }
}

#[async_trait]
impl MessageProducer for RabbitMqProducer {
    async fn connect(&self) -> PipelineResult<bool> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.as_ref() {
            if existing.connection.status().connected() {
                return Ok(false);
            }
        }

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("创建通道失败: {e}")))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PipelineError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", self.url);
        *state = Some(ProducerState {
            connection,
            channel,
        });
        Ok(true)
    }

    async fn disconnect(&self) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.take() {
            if let Err(e) = existing.connection.close(200, "正常关闭").await {
                warn!("关闭RabbitMQ连接失败: {e}");
            } else {
                info!("RabbitMQ生产者连接已关闭");
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.connection.status().connected())
            .unwrap_or(false)
    }

    async fn publish(&self, message: &Message) -> PipelineResult<()> {
        let state = self.state.lock().await;
        let state = state
            .as_ref()
            .ok_or_else(|| PipelineError::MessageQueue("生产者未连接".to_string()))?;
        self.publish_on(&state.channel, message).await
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

        {
            let state = self.state.lock().await;
            let state = state
                .as_ref()
                .ok_or_else(|| PipelineError::MessageQueue("生产者未连接".to_string()))?;

            // 回复队列在请求发出前声明，独占且自动删除
            state
                .channel
                .queue_declare(
                    &reply_topic,
                    QueueDeclareOptions {
                        exclusive: true,
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PipelineError::MessageQueue(format!("声明回复队列 {reply_topic} 失败: {e}"))
                })?;

            self.publish_on(&state.channel, message).await?;
        }

        // 轮询回复队列直到拿到关联ID匹配的应答或超时
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                debug!(correlation_id = %correlation_id, "请求等待应答超时");
                return Ok(None);
            }

            let got = {
                let state = self.state.lock().await;
                let state = state
                    .as_ref()
                    .ok_or_else(|| PipelineError::MessageQueue("生产者未连接".to_string()))?;
                state
                    .channel
                    .basic_get(&reply_topic, BasicGetOptions::default())
                    .await
                    .map_err(|e| {
                        PipelineError::MessageQueue(format!("读取回复队列失败: {e}"))
                    })?
            };

            match got {
                Some(get_message) => {
                    let delivery = get_message.delivery;
                    if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                        warn!("确认应答消息失败: {e}");
                    }
                    match Message::deserialize_bytes(&delivery.data) {
                        Ok(reply)
                            if reply.correlation_id.as_deref()
                                == Some(correlation_id.as_str()) =>
                        {
                            return Ok(Some(reply));
                        }
                        Ok(other) => {
                            warn!(message_id = %other.id, "应答关联ID不匹配，丢弃");
                        }
                        Err(e) => {
                            warn!("应答消息解码失败: {e}");
                        }
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    }
}
