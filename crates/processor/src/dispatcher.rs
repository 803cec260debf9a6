//! 消息到处理器的分发
//!
//! 每个处理器包一个分发器挂到队列订阅上。分发器负责
//! 解码、过滤、幂等判定和审计事件落库，处理器只管干活。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use filepipe_domain::{
    ExecutionMode, FileProcessing, Message, MessageHandler, PipelineEvent,
    PipelineEventRepository, ProcessResult,
};
use filepipe_errors::{PipelineError, PipelineResult};

use crate::processor::Processor;

pub struct ProcessorDispatcher {
    processor: Arc<dyn Processor>,
    events: Arc<dyn PipelineEventRepository>,
}

impl ProcessorDispatcher {
    pub fn new(processor: Arc<dyn Processor>, events: Arc<dyn PipelineEventRepository>) -> Self {
        Self { processor, events }
    }

    fn event(&self, record: &FileProcessing, result: ProcessResult) -> PipelineEvent {
        PipelineEvent::new(
            record.file_name.clone(),
            "process".to_string(),
            self.processor.name().to_string(),
            result,
        )
        .with_hash(record.file_hash.clone())
    }

    /// 同一文件内容被同一处理器成功处理过即跳过
    async fn already_processed(&self, record: &FileProcessing) -> PipelineResult<bool> {
        match &record.file_hash {
            Some(hash) => {
                self.events
                    .has_success(&record.file_name, self.processor.name(), hash)
                    .await
            }
            // 没有哈希就无法判定，按未处理对待
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MessageHandler for ProcessorDispatcher {
    fn execution_mode(&self) -> ExecutionMode {
        self.processor.execution_mode()
    }

    async fn handle(&self, message: Message) -> PipelineResult<()> {
        let payload = message.decode()?;
        let record = match payload.as_file_processing() {
            Some(record) => record.clone(),
            None => {
                return Err(PipelineError::Serialization(
                    "期望文件处理记录载荷".to_string(),
                ))
            }
        };

        if !self.processor.is_enabled() {
            warn!(
                processor = self.processor.name(),
                file_id = %record.file_id,
                "处理器已停用，消息被丢弃"
            );
            return Ok(());
        }

        if !self.processor.can_process(&record) {
            warn!(
                processor = self.processor.name(),
                file_id = %record.file_id,
                file_type = %record.file_type,
                "文件不匹配处理器，消息被丢弃"
            );
            return Ok(());
        }

        if self.already_processed(&record).await? {
            info!(
                processor = self.processor.name(),
                file_id = %record.file_id,
                "内容已成功处理过，跳过"
            );
            self.processor.stats().record(ProcessResult::Skipped);
            let event = self
                .event(&record, ProcessResult::Skipped)
                .with_metadata(json!({"reason": "重复内容"}));
            self.events.record(&event).await?;
            return Ok(());
        }

        match self.processor.process(&record).await {
            Ok(output) => {
                let event = self
                    .event(&record, output.result)
                    .with_metadata(output.metadata)
                    .with_output_files(output.output_files);
                self.events.record(&event).await?;
                Ok(())
            }
            Err(error) => {
                let event = self
                    .event(&record, ProcessResult::Failed)
                    .with_metadata(json!({"error": error.to_string()}));
                self.events.record(&event).await?;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessOutput, ProcessorStats};
    use filepipe_domain::Payload;
    use filepipe_testing_utils::{audio_record, MockPipelineEventRepository};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProcessor {
        enabled: AtomicBool,
        fail: bool,
        stats: ProcessorStats,
    }

    impl StubProcessor {
        fn new(fail: bool) -> Self {
            Self {
                enabled: AtomicBool::new(true),
                fail,
                stats: ProcessorStats::new(),
            }
        }
    }

    #[async_trait]
    impl Processor for StubProcessor {
        fn name(&self) -> &str {
            "stub"
        }

        fn topic(&self) -> &str {
            "stub"
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }

        fn stats(&self) -> &ProcessorStats {
            &self.stats
        }

        fn can_process(&self, record: &FileProcessing) -> bool {
            record.file_type == ".mp3"
        }

        async fn process(&self, _record: &FileProcessing) -> PipelineResult<ProcessOutput> {
            if self.fail {
                return Err(PipelineError::Transcription("引擎故障".to_string()));
            }
            Ok(ProcessOutput::success())
        }
    }

    fn message_for(record: &FileProcessing) -> Message {
        Message::point_to_point("stub", &Payload::FileProcessing(record.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_success_records_event() {
        let events = Arc::new(MockPipelineEventRepository::new());
        let dispatcher =
            ProcessorDispatcher::new(Arc::new(StubProcessor::new(false)), events.clone());

        let record = audio_record("f1");
        dispatcher.handle(message_for(&record)).await.unwrap();

        let recorded = events.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].result, ProcessResult::Success);
        assert_eq!(recorded[0].processor_name, "stub");
    }

    #[tokio::test]
    async fn test_duplicate_content_skipped() {
        let events = Arc::new(MockPipelineEventRepository::new());
        let processor = Arc::new(StubProcessor::new(false));
        let dispatcher = ProcessorDispatcher::new(processor.clone(), events.clone());

        let record = audio_record("f1");
        dispatcher.handle(message_for(&record)).await.unwrap();
        dispatcher.handle(message_for(&record)).await.unwrap();

        let recorded = events.snapshot();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].result, ProcessResult::Success);
        assert_eq!(recorded[1].result, ProcessResult::Skipped);

        // 跳过也计入处理器统计
        let snapshot = processor.stats().snapshot();
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.processed, 1);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_propagated() {
        let events = Arc::new(MockPipelineEventRepository::new());
        let dispatcher =
            ProcessorDispatcher::new(Arc::new(StubProcessor::new(true)), events.clone());

        let record = audio_record("f1");
        assert!(dispatcher.handle(message_for(&record)).await.is_err());

        let recorded = events.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].result, ProcessResult::Failed);
        assert!(recorded[0].metadata["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_mismatched_file_dropped_silently() {
        let events = Arc::new(MockPipelineEventRepository::new());
        let dispatcher =
            ProcessorDispatcher::new(Arc::new(StubProcessor::new(false)), events.clone());

        let mut record = audio_record("f1");
        record.file_type = ".txt".to_string();
        dispatcher.handle(message_for(&record)).await.unwrap();
        assert!(events.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_processor_drops_message() {
        let events = Arc::new(MockPipelineEventRepository::new());
        let processor = Arc::new(StubProcessor::new(false));
        processor.set_enabled(false);
        let dispatcher = ProcessorDispatcher::new(processor, events.clone());

        dispatcher
            .handle(message_for(&audio_record("f1")))
            .await
            .unwrap();
        assert!(events.snapshot().is_empty());
    }
}
