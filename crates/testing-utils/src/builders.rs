//! 测试数据构造器

use filepipe_domain::{FileProcessing, PipelineEvent, ProcessResult, SourceType, TaskConfig};

/// FTP来源的音频文件记录
pub fn audio_record(file_id: &str) -> FileProcessing {
    FileProcessing::new(
        file_id.to_string(),
        format!("{file_id}.mp3"),
        SourceType::Ftp,
        "ftp-dir-1".to_string(),
        ".mp3".to_string(),
    )
    .with_size(2048)
    .with_hash(format!("hash-{file_id}"))
}

/// 转写产物的文本文件记录
pub fn transcript_record(file_id: &str, source_file_id: &str) -> FileProcessing {
    FileProcessing::new(
        file_id.to_string(),
        format!("{file_id}.txt"),
        SourceType::Stt,
        "ftp-dir-1".to_string(),
        ".txt".to_string(),
    )
    .with_hash(format!("hash-{file_id}"))
    .with_source_file_id(source_file_id.to_string())
}

pub fn success_event(file_path: &str, processor: &str, hash: &str) -> PipelineEvent {
    PipelineEvent::new(
        file_path.to_string(),
        "process".to_string(),
        processor.to_string(),
        ProcessResult::Success,
    )
    .with_hash(Some(hash.to_string()))
}

pub fn task_config(task_id: &str, interval_seconds: i64) -> TaskConfig {
    TaskConfig::new(
        task_id.to_string(),
        format!("{task_id} 任务"),
        "测试任务".to_string(),
        interval_seconds,
        true,
    )
}
