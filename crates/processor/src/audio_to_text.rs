//! 语音转文字处理器
//!
//! 消费 "stt" 主题上的FTP音频文件：下载、转写、把转写文本
//! 存回文件存储，并为产物创建一条新的待处理记录投递到下游。

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use filepipe_domain::{
    FileProcessing, FileProcessingRepository, FileStorage, Payload, ProcessStatus, QueueManager,
    SourceType, Transcriber,
};
use filepipe_errors::{PipelineError, PipelineResult};

use crate::processor::{ProcessOutput, Processor, ProcessorStats};

pub const STT_TOPIC: &str = "stt";
pub const KNOWLEDGE_TOPIC: &str = "to_knowledge";
/// 转写文本的存储桶
pub const TRANSCRIPT_BUCKET: &str = "to_knowledge";

pub const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".m4a", ".flac", ".aac", ".ogg", ".wma"];
/// 低于该置信度的片段会被转写引擎过滤
const CONFIDENCE_THRESHOLD: f64 = 0.5;

pub struct AudioToTextProcessor {
    storage: Arc<dyn FileStorage>,
    transcriber: Arc<dyn Transcriber>,
    files: Arc<dyn FileProcessingRepository>,
    queue: Arc<dyn QueueManager>,
    enabled: AtomicBool,
    stats: ProcessorStats,
}

impl AudioToTextProcessor {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        transcriber: Arc<dyn Transcriber>,
        files: Arc<dyn FileProcessingRepository>,
        queue: Arc<dyn QueueManager>,
    ) -> Self {
        Self {
            storage,
            transcriber,
            files,
            queue,
            enabled: AtomicBool::new(true),
            stats: ProcessorStats::new(),
        }
    }

    async fn run(&self, record: &FileProcessing) -> PipelineResult<ProcessOutput> {
        self.files
            .update_status(
                &record.file_id,
                ProcessStatus::Processing,
                Some(Utc::now()),
                None,
            )
            .await?;

        let content = self.storage.get(&record.file_id).await?;

        // 转写引擎按路径取文件，先落到临时文件
        let suffix = record.extension().unwrap_or_else(|| ".bin".to_string());
        let mut temp = tempfile::Builder::new()
            .prefix("filepipe-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| PipelineError::Storage(format!("创建临时文件失败: {e}")))?;
        temp.write_all(&content)
            .map_err(|e| PipelineError::Storage(format!("写入临时文件失败: {e}")))?;

        let transcript = self
            .transcriber
            .transcribe(temp.path(), CONFIDENCE_THRESHOLD)
            .await?;

        let transcript_name = format!("{}_transcript.txt", record.file_stem());
        let transcript_bytes = transcript.text.as_bytes();
        let transcript_file_id = self
            .storage
            .save(TRANSCRIPT_BUCKET, &transcript_name, transcript_bytes)
            .await?;

        let hash = format!("{:x}", Sha256::digest(transcript_bytes));
        let derived = FileProcessing::new(
            transcript_file_id,
            transcript_name.clone(),
            SourceType::Stt,
            record.source_id.clone(),
            ".txt".to_string(),
        )
        .with_size(transcript_bytes.len() as i64)
        .with_hash(hash)
        .with_source_file_id(record.file_id.clone());
        let derived = self.files.create(&derived).await?;

        self.files
            .update_status(
                &record.file_id,
                ProcessStatus::Success,
                None,
                Some(Utc::now()),
            )
            .await?;

        // 产物直接进入知识库主题，不等下一轮扫描
        self.queue
            .publish_point_to_point(KNOWLEDGE_TOPIC, &Payload::FileProcessing(derived))
            .await?;

        info!(
            file_id = %record.file_id,
            transcript = %transcript_name,
            duration_seconds = transcript.duration_seconds,
            "音频转写完成"
        );
        Ok(ProcessOutput::success()
            .with_output_files(vec![transcript_name])
            .with_metadata(json!({"duration_seconds": transcript.duration_seconds})))
    }
}

#[async_trait]
impl Processor for AudioToTextProcessor {
    fn name(&self) -> &str {
        "audio_to_text"
    }

    fn topic(&self) -> &str {
        STT_TOPIC
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
        record.source_type == SourceType::Ftp
            && record
                .extension()
                .map_or(false, |ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn process(&self, record: &FileProcessing) -> PipelineResult<ProcessOutput> {
        match self.run(record).await {
            Ok(output) => {
                self.stats.record(output.result);
                Ok(output)
            }
            Err(error) => {
                self.stats.record(filepipe_domain::ProcessResult::Failed);
                // 状态标记失败，原始错误优先返回
                let _ = self
                    .files
                    .update_status(
                        &record.file_id,
                        ProcessStatus::Failed,
                        None,
                        Some(Utc::now()),
                    )
                    .await;
                Err(error)
            }
        }
    }
}
