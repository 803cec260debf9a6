//! 处理器抽象
//!
//! 每个处理器绑定一个队列主题，声明自己能处理哪些文件，
//! 并维护运行计数。注册中心统一负责订阅和分发。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use filepipe_domain::{ExecutionMode, FileProcessing, ProcessResult};
use filepipe_errors::PipelineResult;

/// 一次处理的产出
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub result: ProcessResult,
    pub output_files: Vec<String>,
    pub metadata: Value,
}

impl ProcessOutput {
    pub fn success() -> Self {
        Self {
            result: ProcessResult::Success,
            output_files: Vec::new(),
            metadata: Value::Null,
        }
    }

    pub fn with_output_files(mut self, output_files: Vec<String>) -> Self {
        self.output_files = output_files;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 文件处理器
#[async_trait]
pub trait Processor: Send + Sync {
    /// 处理器名，注册中心内唯一
    fn name(&self) -> &str;

    /// 订阅的队列主题
    fn topic(&self) -> &str;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// 处理计数器，每次投递结果都要累加
    fn stats(&self) -> &ProcessorStats;

    /// 描述性过滤，路由错投的消息在这里被丢弃
    fn can_process(&self, record: &FileProcessing) -> bool;

    async fn process(&self, record: &FileProcessing) -> PipelineResult<ProcessOutput>;
}

/// 处理计数器，原子累加
#[derive(Debug, Default)]
pub struct ProcessorStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: ProcessResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match result {
            ProcessResult::Success | ProcessResult::Partial => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            ProcessResult::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ProcessResult::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counting() {
        let stats = ProcessorStats::new();
        stats.record(ProcessResult::Success);
        stats.record(ProcessResult::Failed);
        stats.record(ProcessResult::Skipped);
        stats.record(ProcessResult::Partial);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.skipped, 1);
    }
}
