use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 文件存储与外部协作方配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 本地存储根目录，桶对应其下的子目录
    pub storage_root: String,
    /// 转写命令，stdout输出 `{"text": "...", "duration_seconds": 0.0}`。
    /// 不配置则不启用音频处理器。
    pub transcriber_command: Option<String>,
    /// 知识库落地目录，缺省挂在存储根目录下
    pub knowledge_root: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: "./data".to_string(),
            transcriber_command: None,
            knowledge_root: None,
        }
    }
}

impl PipelineConfig {
    pub fn knowledge_root(&self) -> String {
        match &self.knowledge_root {
            Some(root) => root.clone(),
            None => format!("{}/knowledge", self.storage_root),
        }
    }
}

impl ConfigValidator for PipelineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.storage_root, "pipeline.storage_root")?;
        if let Some(command) = &self.transcriber_command {
            ValidationUtils::validate_not_empty(command, "pipeline.transcriber_command")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_knowledge_root_fallback() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.knowledge_root(), "./data/knowledge");

        let config = PipelineConfig {
            knowledge_root: Some("/var/knowledge".to_string()),
            ..Default::default()
        };
        assert_eq!(config.knowledge_root(), "/var/knowledge");
    }

    #[test]
    fn test_empty_storage_root_rejected() {
        let config = PipelineConfig {
            storage_root: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
