use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 文件发现扫描任务的默认间隔
    pub file_scan_interval_seconds: u64,
    /// 查询执行历史时的默认条数上限
    pub execution_history_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_scan_interval_seconds: 300,
            execution_history_limit: 50,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(self.file_scan_interval_seconds)?;
        ValidationUtils::validate_count(
            self.execution_history_limit.max(0) as usize,
            "scheduler.execution_history_limit",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_validation() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.file_scan_interval_seconds = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.execution_history_limit = 0;
        assert!(invalid_config.validate().is_err());
    }
}
