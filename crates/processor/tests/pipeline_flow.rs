//! 音频到知识库的全链路测试，走内存消息队列

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use filepipe_config::models::MessageQueueConfig;
use filepipe_domain::{
    FileProcessingRepository, Payload, ProcessResult, ProcessStatus, QueueManager, SourceType,
};
use filepipe_infrastructure::InMemoryQueueManager;
use filepipe_processor::{
    AudioToTextProcessor, KnowledgeProcessor, ProcessorRegistry, STT_TOPIC,
};
use filepipe_testing_utils::{
    MockFileProcessingRepository, MockKnowledgeIndexer, MockKnowledgeMappingRepository,
    MockPipelineEventRepository, MockTranscriber, MockFileStorage,
};

struct Harness {
    files: Arc<MockFileProcessingRepository>,
    events: Arc<MockPipelineEventRepository>,
    storage: Arc<MockFileStorage>,
    transcriber: Arc<MockTranscriber>,
    indexer: Arc<MockKnowledgeIndexer>,
    queue: Arc<InMemoryQueueManager>,
    registry: ProcessorRegistry,
}

async fn harness() -> Harness {
    let files = Arc::new(MockFileProcessingRepository::new());
    let events = Arc::new(MockPipelineEventRepository::new());
    let storage = Arc::new(MockFileStorage::new());
    let transcriber = Arc::new(MockTranscriber::new("会议要点：下周发布。"));
    let indexer = Arc::new(MockKnowledgeIndexer::new());
    let mappings = Arc::new(MockKnowledgeMappingRepository::new());
    let queue = Arc::new(InMemoryQueueManager::new(
        MessageQueueConfig::in_memory_default(),
    ));

    let registry = ProcessorRegistry::new(events.clone(), queue.clone());
    registry
        .register(Arc::new(AudioToTextProcessor::new(
            storage.clone(),
            transcriber.clone(),
            files.clone(),
            queue.clone(),
        )))
        .await;
    registry
        .register(Arc::new(KnowledgeProcessor::new(
            indexer.clone(),
            mappings.clone(),
            files.clone(),
        )))
        .await;
    registry.start_all().await.unwrap();

    Harness {
        files,
        events,
        storage,
        transcriber,
        indexer,
        queue,
        registry,
    }
}

/// 上传一个音频文件：落存储、建记录，返回记录
async fn upload_audio(h: &Harness, name: &str, content: &[u8]) -> filepipe_domain::FileProcessing {
    let file_id = h.storage.seed("ftp", name, content);
    let record = filepipe_domain::FileProcessing::new(
        file_id,
        name.to_string(),
        SourceType::Ftp,
        "ftp-dir-1".to_string(),
        ".mp3".to_string(),
    )
    .with_size(content.len() as i64)
    .with_hash(format!("{:x}", sha256_of(content)));
    h.files.create(&record).await.unwrap()
}

fn sha256_of(content: &[u8]) -> impl std::fmt::LowerHex {
    use sha2::{Digest, Sha256};
    Sha256::digest(content)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("等待流水线完成超时"));
}

#[tokio::test]
async fn test_audio_flows_to_knowledge() {
    let h = harness().await;
    let record = upload_audio(&h, "standup.mp3", b"fake-audio").await;

    h.queue
        .publish_point_to_point(STT_TOPIC, &Payload::FileProcessing(record.clone()))
        .await
        .unwrap();

    let indexer = h.indexer.clone();
    wait_until(|| !indexer.documents().is_empty()).await;

    // 原始音频记录成功收尾
    let audio = h.files.get_by_file_id(&record.file_id).await.unwrap().unwrap();
    assert_eq!(audio.status, ProcessStatus::Success);
    assert!(audio.start_time.is_some());
    assert!(audio.end_time.is_some());

    // 转写产物：独立记录，来源标记为转写，回链原始文件
    let derived: Vec<_> = h
        .files
        .snapshot()
        .into_iter()
        .filter(|r| r.source_type == SourceType::Stt)
        .collect();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].file_name, "standup_transcript.txt");
    assert_eq!(derived[0].source_file_id.as_deref(), Some(record.file_id.as_str()));

    let derived_done = h.files.clone();
    let derived_id = derived[0].file_id.clone();
    wait_until(move || {
        derived_done
            .snapshot()
            .iter()
            .any(|r| r.file_id == derived_id && r.status == ProcessStatus::Success)
    })
    .await;

    // 转写文本进了存储桶，知识库里建了档
    assert_eq!(h.storage.saved_names("to_knowledge").len(), 1);
    assert_eq!(h.indexer.documents().len(), 1);

    h.registry.stop_all().await.unwrap();
    h.queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_content_processed_once() {
    let h = harness().await;
    let record = upload_audio(&h, "standup.mp3", b"fake-audio").await;

    h.queue
        .publish_point_to_point(STT_TOPIC, &Payload::FileProcessing(record.clone()))
        .await
        .unwrap();
    let indexer = h.indexer.clone();
    wait_until(|| !indexer.documents().is_empty()).await;

    // 同一内容重复投递
    h.queue
        .publish_point_to_point(STT_TOPIC, &Payload::FileProcessing(record.clone()))
        .await
        .unwrap();
    let events = h.events.clone();
    wait_until(move || {
        events
            .snapshot()
            .iter()
            .any(|e| e.processor_name == "audio_to_text" && e.result == ProcessResult::Skipped)
    })
    .await;

    // 只转写了一次，只有一条产物记录
    assert_eq!(h.transcriber.call_count(), 1);
    let derived_count = h
        .files
        .snapshot()
        .iter()
        .filter(|r| r.source_type == SourceType::Stt)
        .count();
    assert_eq!(derived_count, 1);

    let audio_events: Vec<_> = h
        .events
        .snapshot()
        .into_iter()
        .filter(|e| e.processor_name == "audio_to_text")
        .collect();
    assert_eq!(audio_events.len(), 2);
    assert_eq!(audio_events[0].result, ProcessResult::Success);
    assert_eq!(audio_events[1].result, ProcessResult::Skipped);

    h.registry.stop_all().await.unwrap();
    h.queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_file_recovers_through_retrying() {
    let h = harness().await;
    h.transcriber.set_fail(true);
    let record = upload_audio(&h, "standup.mp3", b"fake-audio").await;

    h.queue
        .publish_point_to_point(STT_TOPIC, &Payload::FileProcessing(record.clone()))
        .await
        .unwrap();

    let files = h.files.clone();
    let file_id = record.file_id.clone();
    wait_until(move || {
        files
            .snapshot()
            .iter()
            .any(|r| r.file_id == file_id && r.status == ProcessStatus::Failed)
    })
    .await;

    // 失败事件带错误详情
    let failed_events: Vec<_> = h
        .events
        .snapshot()
        .into_iter()
        .filter(|e| e.result == ProcessResult::Failed)
        .collect();
    assert_eq!(failed_events.len(), 1);
    assert!(failed_events[0].metadata["error"].as_str().is_some());

    // 恢复路径：failed -> retrying -> 重新投递
    h.transcriber.set_fail(false);
    h.files
        .update_status(&record.file_id, ProcessStatus::Retrying, None, None)
        .await
        .unwrap();
    h.queue
        .publish_point_to_point(STT_TOPIC, &Payload::FileProcessing(record.clone()))
        .await
        .unwrap();

    let files = h.files.clone();
    let file_id = record.file_id.clone();
    wait_until(move || {
        files
            .snapshot()
            .iter()
            .any(|r| r.file_id == file_id && r.status == ProcessStatus::Success)
    })
    .await;
    assert_eq!(h.transcriber.call_count(), 2);

    h.registry.stop_all().await.unwrap();
    h.queue.shutdown().await.unwrap();
}
