use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use filepipe_domain::{FileStorage, KnowledgeIndexer};
use filepipe_errors::{PipelineError, PipelineResult};

/// 目录型知识库：空间是目录，文档是从存储拉取后落地的文件
pub struct LocalKnowledgeIndexer {
    root: PathBuf,
    storage: Arc<dyn FileStorage>,
}

impl LocalKnowledgeIndexer {
    pub fn new(root: impl Into<PathBuf>, storage: Arc<dyn FileStorage>) -> Self {
        Self {
            root: root.into(),
            storage,
        }
    }

    fn space_dir(&self, space: &str) -> PipelineResult<PathBuf> {
        if space.contains('/') || space.contains("..") {
            return Err(PipelineError::Knowledge(format!("非法的空间名: {space}")));
        }
        Ok(self.root.join(space))
    }
}

#[async_trait]
impl KnowledgeIndexer for LocalKnowledgeIndexer {
    async fn create_space(&self, name: &str) -> PipelineResult<()> {
        let dir = self.space_dir(name)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::Knowledge(format!("创建知识空间失败: {e}")))?;
        Ok(())
    }

    async fn create_document(
        &self,
        space: &str,
        doc_name: &str,
        content_file_id: &str,
    ) -> PipelineResult<String> {
        let content = self.storage.get(content_file_id).await?;
        let dir = self.space_dir(space)?;
        let path = dir.join(doc_name);
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| PipelineError::Knowledge(format!("写入文档失败: {e}")))?;
        let doc_id = format!("{space}/{doc_name}");
        info!(doc_id = %doc_id, bytes = content.len(), "文档已落地");
        Ok(doc_id)
    }

    async fn sync(&self, _space: &str, doc_id: &str) -> PipelineResult<Vec<String>> {
        // 本地形态没有异步切片流程，同步即完成
        Ok(vec![doc_id.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::LocalFileStorage;

    #[tokio::test]
    async fn test_document_lands_in_space_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFileStorage::new(dir.path().join("objects")));
        let indexer = LocalKnowledgeIndexer::new(dir.path().join("knowledge"), storage.clone());

        let file_id = storage
            .save("to_knowledge", "a_transcript.txt", "会议要点".as_bytes())
            .await
            .unwrap();
        indexer.create_space("会议记录").await.unwrap();
        let doc_id = indexer
            .create_document("会议记录", "a_transcript.txt", &file_id)
            .await
            .unwrap();
        assert_eq!(doc_id, "会议记录/a_transcript.txt");

        let landed = dir.path().join("knowledge/会议记录/a_transcript.txt");
        assert_eq!(std::fs::read_to_string(landed).unwrap(), "会议要点");

        let sync_ids = indexer.sync("会议记录", &doc_id).await.unwrap();
        assert_eq!(sync_ids, vec![doc_id]);
    }

    #[tokio::test]
    async fn test_bad_space_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFileStorage::new(dir.path()));
        let indexer = LocalKnowledgeIndexer::new(dir.path(), storage);
        assert!(indexer.create_space("../escape").await.is_err());
    }
}
