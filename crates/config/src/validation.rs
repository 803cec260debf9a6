use crate::{ConfigError, ConfigResult};

/// 配置项验证接口
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }

    pub fn validate_count(value: usize, field: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{field} must be greater than 0"
            )));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(value: u64) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(
                "timeout must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }
}
