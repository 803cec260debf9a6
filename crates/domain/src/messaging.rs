use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::FileProcessing;
use filepipe_errors::{PipelineError, PipelineResult};

/// 消息路由模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessagePattern {
    PointToPoint,
    PublishSubscribe,
    RequestResponse,
    Broadcast,
}

/// 载荷编码策略
///
/// `Auto` 优先JSON，失败时回退到二进制（base64包装的JSON字节）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SerializationStrategy {
    Json,
    Binary,
    Auto,
}

/// 消息载荷，封闭的带标签联合
///
/// 解码表即这个枚举本身，未知标签直接报序列化错误。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    FileProcessing(FileProcessing),
    Text(String),
    Json(serde_json::Value),
    /// base64编码的原始字节
    Bytes(String),
}

impl Payload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Payload::Bytes(BASE64.encode(bytes))
    }

    pub fn as_file_processing(&self) -> Option<&FileProcessing> {
        match self {
            Payload::FileProcessing(record) => Some(record),
            _ => None,
        }
    }
}

/// 序列化载荷，返回编码文本和实际采用的策略
///
/// 返回的策略永远不是 `Auto`，消息解码时据此精确还原。
pub fn serialize(
    payload: &Payload,
    strategy: SerializationStrategy,
) -> PipelineResult<(String, SerializationStrategy)> {
    match strategy {
        SerializationStrategy::Json => {
            let text = serde_json::to_string(payload)?;
            Ok((text, SerializationStrategy::Json))
        }
        SerializationStrategy::Binary => {
            let bytes = serde_json::to_vec(payload)
                .map_err(|e| PipelineError::Serialization(format!("二进制编码失败: {e}")))?;
            Ok((BASE64.encode(bytes), SerializationStrategy::Binary))
        }
        SerializationStrategy::Auto => {
            // 原始字节载荷直接走二进制通道
            if matches!(payload, Payload::Bytes(_)) {
                return serialize(payload, SerializationStrategy::Binary);
            }
            match serde_json::to_string(payload) {
                Ok(text) => Ok((text, SerializationStrategy::Json)),
                Err(json_err) => {
                    tracing::debug!("JSON序列化失败，回退到二进制策略: {json_err}");
                    serialize(payload, SerializationStrategy::Binary).map_err(|bin_err| {
                        PipelineError::Serialization(format!(
                            "两种策略均失败: json={json_err}, binary={bin_err}"
                        ))
                    })
                }
            }
        }
    }
}

/// 反序列化载荷
pub fn deserialize(encoded: &str, strategy: SerializationStrategy) -> PipelineResult<Payload> {
    match strategy {
        SerializationStrategy::Json => Ok(serde_json::from_str(encoded)?),
        SerializationStrategy::Binary => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| PipelineError::Serialization(format!("base64解码失败: {e}")))?;
            Ok(serde_json::from_slice(&bytes)?)
        }
        SerializationStrategy::Auto => match deserialize(encoded, SerializationStrategy::Json) {
            Ok(payload) => Ok(payload),
            Err(json_err) => deserialize(encoded, SerializationStrategy::Binary).map_err(
                |bin_err| {
                    PipelineError::Serialization(format!(
                        "两种策略均失败: json={json_err}, binary={bin_err}"
                    ))
                },
            ),
        },
    }
}

/// 消息信封
///
/// 构造后即不可变；载荷在构造时编码，投递时通过 `decode` 还原。
/// 信封本身只上线，从不落库。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub pattern: MessagePattern,
    pub topic: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: HashMap<String, serde_json::Value>,
    pub serialization_strategy: SerializationStrategy,
}

impl Message {
    fn build(
        pattern: MessagePattern,
        topic: &str,
        payload: &Payload,
        strategy: SerializationStrategy,
    ) -> PipelineResult<Self> {
        let (encoded, resolved) = serialize(payload, strategy)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            pattern,
            topic: topic.to_string(),
            payload: encoded,
            timestamp: Utc::now(),
            reply_to: None,
            correlation_id: None,
            headers: HashMap::new(),
            serialization_strategy: resolved,
        })
    }

    /// 创建点对点消息
    pub fn point_to_point(topic: &str, payload: &Payload) -> PipelineResult<Self> {
        Self::build(
            MessagePattern::PointToPoint,
            topic,
            payload,
            SerializationStrategy::Auto,
        )
    }

    /// 创建广播消息
    pub fn broadcast(topic: &str, payload: &Payload) -> PipelineResult<Self> {
        Self::build(
            MessagePattern::Broadcast,
            topic,
            payload,
            SerializationStrategy::Auto,
        )
    }

    /// 创建请求消息，自动生成回复队列和关联ID
    pub fn request(topic: &str, payload: &Payload) -> PipelineResult<Self> {
        let mut message = Self::build(
            MessagePattern::RequestResponse,
            topic,
            payload,
            SerializationStrategy::Auto,
        )?;
        message.reply_to = Some(format!("reply.{}", Uuid::new_v4()));
        message.correlation_id = Some(Uuid::new_v4().to_string());
        Ok(message)
    }

    /// 针对请求消息构造应答
    pub fn reply_to(request: &Message, payload: &Payload) -> PipelineResult<Self> {
        let reply_topic = request
            .reply_to
            .as_deref()
            .ok_or_else(|| PipelineError::validation_error("请求消息缺少reply_to"))?;
        let mut message = Self::build(
            MessagePattern::RequestResponse,
            reply_topic,
            payload,
            SerializationStrategy::Auto,
        )?;
        message.correlation_id = request.correlation_id.clone();
        Ok(message)
    }

    pub fn with_header(mut self, key: &str, value: serde_json::Value) -> Self {
        self.headers.insert(key.to_string(), value);
        self
    }

    /// 还原构造时编码的载荷
    pub fn decode(&self) -> PipelineResult<Payload> {
        deserialize(&self.payload, self.serialization_strategy)
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SourceType;

    fn sample_record() -> FileProcessing {
        FileProcessing::new(
            "file-001".to_string(),
            "report.txt".to_string(),
            SourceType::Ftp,
            "src-1".to_string(),
            ".txt".to_string(),
        )
        .with_hash("abc123".to_string())
    }

    #[test]
    fn test_round_trip_json() {
        let payload = Payload::FileProcessing(sample_record());
        let (encoded, resolved) = serialize(&payload, SerializationStrategy::Json).unwrap();
        assert_eq!(resolved, SerializationStrategy::Json);
        let decoded = deserialize(&encoded, SerializationStrategy::Json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_round_trip_binary() {
        let payload = Payload::Text("中文文本".to_string());
        let (encoded, resolved) = serialize(&payload, SerializationStrategy::Binary).unwrap();
        assert_eq!(resolved, SerializationStrategy::Binary);
        // 线上形态是base64，不含JSON结构字符
        assert!(!encoded.contains('{'));
        let decoded = deserialize(&encoded, SerializationStrategy::Binary).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_auto_selects_binary_for_bytes() {
        let payload = Payload::from_bytes(&[0x00, 0xFF, 0x10]);
        let (_, resolved) = serialize(&payload, SerializationStrategy::Auto).unwrap();
        assert_eq!(resolved, SerializationStrategy::Binary);
    }

    #[test]
    fn test_unknown_kind_fails_closed() {
        let encoded = r#"{"kind":"mystery_class","data":{"x":1}}"#;
        let err = deserialize(encoded, SerializationStrategy::Json).unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_message_decode() {
        let payload = Payload::FileProcessing(sample_record());
        let message = Message::point_to_point("stt", &payload).unwrap();
        assert_eq!(message.pattern, MessagePattern::PointToPoint);
        assert_eq!(message.topic, "stt");
        assert_eq!(message.decode().unwrap(), payload);
    }

    #[test]
    fn test_request_reply_correlation() {
        let request = Message::request("health", &Payload::Text("ping".to_string())).unwrap();
        assert!(request.reply_to.is_some());
        assert!(request.correlation_id.is_some());

        let reply = Message::reply_to(&request, &Payload::Text("pong".to_string())).unwrap();
        assert_eq!(reply.topic, request.reply_to.clone().unwrap());
        assert_eq!(reply.correlation_id, request.correlation_id);
    }

    #[test]
    fn test_envelope_wire_round_trip() {
        let message = Message::broadcast("events", &Payload::Json(serde_json::json!({"n": 1})))
            .unwrap()
            .with_header("origin", serde_json::json!("scanner"));
        let bytes = message.serialize_bytes().unwrap();
        let restored = Message::deserialize_bytes(&bytes).unwrap();
        assert_eq!(restored, message);
    }
}
