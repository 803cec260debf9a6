//! 发布重试的指数回退

use std::time::Duration;

use tokio::time::Instant;

use filepipe_domain::{publish_with_retry, Message, Payload, RetryPolicy};
use filepipe_errors::PipelineError;
use filepipe_testing_utils::FlakyProducer;

fn sample_message() -> Message {
    Message::point_to_point("jobs", &Payload::Text("m".to_string())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_with_backoff() {
    let producer = FlakyProducer::failing(2);
    let policy = RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_secs(1),
    };

    let started = Instant::now();
    publish_with_retry(&producer, &sample_message(), &policy)
        .await
        .unwrap();

    // 两次失败各回退一次：1秒 + 2秒
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(producer.publish_attempts(), 3);
    assert_eq!(producer.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_exhausts_retries() {
    let producer = FlakyProducer::failing(100);
    let policy = RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_secs(1),
    };

    let error = publish_with_retry(&producer, &sample_message(), &policy)
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::MessageQueue(_)));
    // 首次尝试加三次重试
    assert_eq!(producer.publish_attempts(), 4);
    assert!(producer.published().is_empty());
}

#[tokio::test]
async fn test_no_failures_publishes_once() {
    let producer = FlakyProducer::failing(0);
    publish_with_retry(&producer, &sample_message(), &RetryPolicy::default())
        .await
        .unwrap();
    assert_eq!(producer.publish_attempts(), 1);
}
