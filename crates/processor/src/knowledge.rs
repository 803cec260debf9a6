//! 知识库入库处理器
//!
//! 消费 "to_knowledge" 主题上的文档：按来源目录映射（缺省用
//! 文件名主干）确定知识空间，建档并触发同步。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use filepipe_domain::{
    FileProcessing, FileProcessingRepository, KnowledgeIndexer, KnowledgeMappingRepository,
    ProcessResult, ProcessStatus,
};
use filepipe_errors::PipelineResult;

use crate::audio_to_text::KNOWLEDGE_TOPIC;
use crate::processor::{ProcessOutput, Processor, ProcessorStats};

const DOCUMENT_EXTENSIONS: &[&str] = &[".txt", ".md", ".pdf", ".doc", ".docx"];

pub struct KnowledgeProcessor {
    indexer: Arc<dyn KnowledgeIndexer>,
    mappings: Arc<dyn KnowledgeMappingRepository>,
    files: Arc<dyn FileProcessingRepository>,
    enabled: AtomicBool,
    stats: ProcessorStats,
}

impl KnowledgeProcessor {
    pub fn new(
        indexer: Arc<dyn KnowledgeIndexer>,
        mappings: Arc<dyn KnowledgeMappingRepository>,
        files: Arc<dyn FileProcessingRepository>,
    ) -> Self {
        Self {
            indexer,
            mappings,
            files,
            enabled: AtomicBool::new(true),
            stats: ProcessorStats::new(),
        }
    }

    async fn resolve_space(&self, record: &FileProcessing) -> PipelineResult<String> {
        match self.mappings.space_for_source(&record.source_id).await? {
            Some(space) => Ok(space),
            None => Ok(record.file_stem().to_string()),
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

        let space = self.resolve_space(record).await?;
        self.indexer.create_space(&space).await?;
        let doc_id = self
            .indexer
            .create_document(&space, &record.file_name, &record.file_id)
            .await?;
        let chunks = self.indexer.sync(&space, &doc_id).await?;

        self.files
            .update_status(
                &record.file_id,
                ProcessStatus::Success,
                None,
                Some(Utc::now()),
            )
            .await?;

        info!(
            file_id = %record.file_id,
            space = %space,
            doc_id = %doc_id,
            chunks = chunks.len(),
            "文档已入库"
        );
        Ok(ProcessOutput::success().with_metadata(json!({
            "space": space,
            "doc_id": doc_id,
            "chunks": chunks.len(),
        })))
    }
}

#[async_trait]
impl Processor for KnowledgeProcessor {
    fn name(&self) -> &str {
        "knowledge"
    }

    fn topic(&self) -> &str {
        KNOWLEDGE_TOPIC
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
        record
            .extension()
            .map_or(false, |ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn process(&self, record: &FileProcessing) -> PipelineResult<ProcessOutput> {
        match self.run(record).await {
            Ok(output) => {
                self.stats.record(output.result);
                Ok(output)
            }
            Err(error) => {
                self.stats.record(ProcessResult::Failed);
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
