pub mod models;
pub mod validation;

pub use models::*;
pub use validation::{ConfigValidator, ValidationUtils};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置验证失败: {0}")]
    Validation(String),
    #[error("配置解析失败: {0}")]
    Parse(String),
    #[error("配置文件错误: {0}")]
    File(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
