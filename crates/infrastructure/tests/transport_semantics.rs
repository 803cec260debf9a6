use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

use filepipe_config::models::MessageQueueConfig;
use filepipe_domain::{Message, MessageHandler, Payload, QueueManager};
use filepipe_errors::PipelineResult;
use filepipe_infrastructure::InMemoryQueueManager;

struct CollectingHandler {
    label: String,
    received: Arc<Mutex<Vec<String>>>,
}

impl CollectingHandler {
    fn new(label: &str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(Self {
            label: label.to_string(),
            received: received.clone(),
        });
        (handler, received)
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, message: Message) -> PipelineResult<()> {
        if let Payload::Text(text) = message.decode()? {
            self.received.lock().await.push(format!("{}:{}", self.label, text));
        }
        Ok(())
    }
}

/// 回声处理器，对每个请求发一条带相同关联ID的应答
struct EchoHandler {
    manager: Arc<InMemoryQueueManager>,
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, message: Message) -> PipelineResult<()> {
        let request_text = match message.decode()? {
            Payload::Text(text) => text,
            other => format!("{other:?}"),
        };
        let reply =
            Message::reply_to(&message, &Payload::Text(format!("echo:{request_text}")))?;
        self.manager.producer().await?.publish(&reply).await?;
        Ok(())
    }
}

async fn wait_for_count(received: &Arc<Mutex<Vec<String>>>, expected: usize) -> Vec<String> {
    let deadline = Duration::from_secs(5);
    timeout(deadline, async {
        loop {
            {
                let guard = received.lock().await;
                if guard.len() >= expected {
                    return guard.clone();
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("等待消息超时，期望 {expected} 条"))
}

#[tokio::test]
async fn test_point_to_point_preserves_publish_order() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let (handler, received) = CollectingHandler::new("c");
    manager
        .subscribe_point_to_point("orders", handler, None)
        .await
        .unwrap();

    for i in 0..5 {
        manager
            .publish_point_to_point("orders", &Payload::Text(format!("m{i}")))
            .await
            .unwrap();
    }

    let messages = wait_for_count(&received, 5).await;
    assert_eq!(messages, vec!["c:m0", "c:m1", "c:m2", "c:m3", "c:m4"]);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_point_to_point_competing_consumers_split_work() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let (handler_a, received_a) = CollectingHandler::new("a");
    let (handler_b, received_b) = CollectingHandler::new("b");
    manager
        .subscribe_point_to_point("jobs", handler_a, Some("worker-a".to_string()))
        .await
        .unwrap();
    manager
        .subscribe_point_to_point("jobs", handler_b, Some("worker-b".to_string()))
        .await
        .unwrap();

    for i in 0..6 {
        manager
            .publish_point_to_point("jobs", &Payload::Text(format!("j{i}")))
            .await
            .unwrap();
    }

    // 点对点语义：每条消息只被一个消费者处理
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let total = received_a.lock().await.len() + received_b.lock().await.len();
        if total >= 6 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "等待消息超时");
        sleep(Duration::from_millis(20)).await;
    }
    sleep(Duration::from_millis(100)).await;
    let total = received_a.lock().await.len() + received_b.lock().await.len();
    assert_eq!(total, 6);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_every_subscriber() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let (handler_a, received_a) = CollectingHandler::new("a");
    let (handler_b, received_b) = CollectingHandler::new("b");
    manager
        .subscribe_broadcast("events", handler_a, None)
        .await
        .unwrap();
    manager
        .subscribe_broadcast("events", handler_b, None)
        .await
        .unwrap();

    manager
        .publish_broadcast("events", &Payload::Text("hello".to_string()))
        .await
        .unwrap();

    assert_eq!(wait_for_count(&received_a, 1).await, vec!["a:hello"]);
    assert_eq!(wait_for_count(&received_b, 1).await, vec!["b:hello"]);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_reply_round_trip() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let echo = Arc::new(EchoHandler {
        manager: manager.clone(),
    });
    manager
        .subscribe_point_to_point("rpc", echo, None)
        .await
        .unwrap();

    let request = Message::request("rpc", &Payload::Text("ping".to_string())).unwrap();
    let producer = manager.producer().await.unwrap();
    let reply = producer
        .request(&request, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("应答超时"));

    assert_eq!(reply.correlation_id, request.correlation_id);
    assert!(matches!(reply.decode().unwrap(), Payload::Text(t) if t == "echo:ping"));
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_times_out_without_responder() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let request = Message::request("nobody", &Payload::Text("ping".to_string())).unwrap();
    let producer = manager.producer().await.unwrap();
    let reply = producer
        .request(&request, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(reply.is_none());
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_consumers() {
    let manager = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));
    let (handler, received) = CollectingHandler::new("c");
    let consumer = manager
        .subscribe_point_to_point("orders", handler, None)
        .await
        .unwrap();
    assert!(consumer.is_consuming().await);

    manager
        .publish_point_to_point("orders", &Payload::Text("before".to_string()))
        .await
        .unwrap();
    wait_for_count(&received, 1).await;

    manager.shutdown().await.unwrap();
    assert!(!consumer.is_consuming().await);
}
