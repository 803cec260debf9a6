//! 文件到队列主题的路由
//!
//! 音频进转写主题，文档和其他类型直接进知识库主题。
//! 知识库处理器会对不认识的类型做二次过滤。

use filepipe_domain::FileProcessing;
use filepipe_processor::{AUDIO_EXTENSIONS, KNOWLEDGE_TOPIC, STT_TOPIC};

pub fn topic_for(record: &FileProcessing) -> &'static str {
    // 文件名没有扩展名时退回记录自带的类型字段
    let file_type = match record.extension() {
        Some(ext) => ext,
        None => record.file_type.to_lowercase(),
    };
    if AUDIO_EXTENSIONS.contains(&file_type.as_str()) {
        STT_TOPIC
    } else {
        KNOWLEDGE_TOPIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_domain::SourceType;

    fn record(file_name: &str, file_type: &str) -> FileProcessing {
        FileProcessing::new(
            "f1".to_string(),
            file_name.to_string(),
            SourceType::Ftp,
            "dir".to_string(),
            file_type.to_string(),
        )
    }

    #[test]
    fn test_audio_routes_to_stt() {
        assert_eq!(topic_for(&record("a.mp3", ".mp3")), STT_TOPIC);
        assert_eq!(topic_for(&record("a.WAV", ".wav")), STT_TOPIC);
    }

    #[test]
    fn test_documents_route_to_knowledge() {
        assert_eq!(topic_for(&record("a.txt", ".txt")), KNOWLEDGE_TOPIC);
        assert_eq!(topic_for(&record("a.pdf", ".pdf")), KNOWLEDGE_TOPIC);
    }

    #[test]
    fn test_unknown_types_default_to_knowledge() {
        assert_eq!(topic_for(&record("a.xyz", ".xyz")), KNOWLEDGE_TOPIC);
        assert_eq!(topic_for(&record("noext", "")), KNOWLEDGE_TOPIC);
    }

    #[test]
    fn test_extensionless_name_falls_back_to_file_type() {
        assert_eq!(topic_for(&record("recording", ".mp3")), STT_TOPIC);
        assert_eq!(topic_for(&record("notes", ".txt")), KNOWLEDGE_TOPIC);
    }
}
