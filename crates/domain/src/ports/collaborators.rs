//! 外部协作方端口
//!
//! 文件存储、语音转写、知识库索引都是接口边界，
//! 消息和记录只携带标识符，从不携带文件内容。

use std::path::Path;

use async_trait::async_trait;

use filepipe_errors::PipelineResult;

/// 文件存储
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// 保存内容并返回存储侧的file_id
    async fn save(&self, bucket: &str, file_name: &str, content: &[u8]) -> PipelineResult<String>;
    async fn get(&self, file_id: &str) -> PipelineResult<Vec<u8>>;
    async fn delete(&self, file_id: &str) -> PipelineResult<bool>;
}

/// 转写结果
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub duration_seconds: f64,
}

/// 语音转写引擎
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path, threshold: f64) -> PipelineResult<Transcript>;
}

/// 知识库索引服务
#[async_trait]
pub trait KnowledgeIndexer: Send + Sync {
    /// 创建知识空间，已存在时幂等返回
    async fn create_space(&self, name: &str) -> PipelineResult<()>;
    async fn create_document(
        &self,
        space: &str,
        doc_name: &str,
        content_file_id: &str,
    ) -> PipelineResult<String>;
    /// 触发文档同步，返回切片任务ID列表
    async fn sync(&self, space: &str, doc_id: &str) -> PipelineResult<Vec<String>>;
}
