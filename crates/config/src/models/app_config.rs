use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig, message_queue::MessageQueueConfig, pipeline::PipelineConfig,
    scheduler::SchedulerConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// 嵌入式/测试部署：内存库加内存队列
    pub fn embedded_default() -> Self {
        Self {
            database: DatabaseConfig::in_memory_default(),
            message_queue: MessageQueueConfig::in_memory_default(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// 加载配置，优先级：TOML文件 < 环境变量(FILEPIPE__前缀)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/filepipe.toml",
                "filepipe.toml",
                "/etc/filepipe/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FILEPIPE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate().context("配置验证失败")?;
        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.message_queue.validate()?;
        self.scheduler.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message_queue::MessageQueueType;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.message_queue.r#type, MessageQueueType::Rabbitmq);
    }

    #[test]
    fn test_embedded_default() {
        let config = AppConfig::embedded_default();
        assert!(config.validate().is_ok());
        assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
        assert_eq!(config.database.url, "sqlite::memory:");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[database]
url = "sqlite://data/pipeline.db"
max_connections = 5

[message_queue]
type = "InMemory"
url = ""

[scheduler]
file_scan_interval_seconds = 60
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.url, "sqlite://data/pipeline.db");
        assert_eq!(config.database.max_connections, 5);
        // 未指定的字段落回默认值
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
        assert_eq!(config.scheduler.file_scan_interval_seconds, 60);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/no/such/config.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = toml::to_string(&config).unwrap();
        let restored: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(restored.database.url, config.database.url);
        assert_eq!(
            restored.message_queue.get_type_string(),
            config.message_queue.get_type_string()
        );
    }
}
