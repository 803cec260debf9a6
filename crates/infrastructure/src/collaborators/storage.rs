use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use filepipe_domain::FileStorage;
use filepipe_errors::{PipelineError, PipelineResult};

/// 目录文件存储，file_id是相对根目录的 "桶/文件名" 路径
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file_id: &str) -> PipelineResult<PathBuf> {
        // 拒绝越出根目录的路径
        if file_id.split('/').any(|part| part == "..") || file_id.starts_with('/') {
            return Err(PipelineError::Storage(format!("非法的file_id: {file_id}")));
        }
        Ok(self.root.join(file_id))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, bucket: &str, file_name: &str, content: &[u8]) -> PipelineResult<String> {
        let file_id = format!("{bucket}/{file_name}");
        let path = self.resolve(&file_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Storage(format!("创建存储目录失败: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PipelineError::Storage(format!("写入文件失败: {e}")))?;
        debug!(file_id = %file_id, bytes = content.len(), "文件已保存");
        Ok(file_id)
    }

    async fn get(&self, file_id: &str) -> PipelineResult<Vec<u8>> {
        let path = self.resolve(file_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::Storage(format!("读取文件失败 {file_id}: {e}")))
    }

    async fn delete(&self, file_id: &str) -> PipelineResult<bool> {
        let path = self.resolve(file_id)?;
        if !Path::new(&path).exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| PipelineError::Storage(format!("删除文件失败 {file_id}: {e}")))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());

        let file_id = storage.save("ftp", "a.mp3", b"audio").await.unwrap();
        assert_eq!(file_id, "ftp/a.mp3");
        assert_eq!(storage.get(&file_id).await.unwrap(), b"audio");
        assert!(storage.delete(&file_id).await.unwrap());
        assert!(!storage.delete(&file_id).await.unwrap());
        assert!(storage.get(&file_id).await.is_err());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        assert!(storage.get("../etc/passwd").await.is_err());
        assert!(storage.get("/etc/passwd").await.is_err());
    }
}
