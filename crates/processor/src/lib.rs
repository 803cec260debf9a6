//! 文件处理器层
//!
//! 处理器抽象、消息分发、注册中心，以及两个内置处理器：
//! 语音转文字和知识库入库。

pub mod audio_to_text;
pub mod dispatcher;
pub mod knowledge;
pub mod processor;
pub mod registry;

pub use audio_to_text::{
    AudioToTextProcessor, AUDIO_EXTENSIONS, KNOWLEDGE_TOPIC, STT_TOPIC, TRANSCRIPT_BUCKET,
};
pub use dispatcher::ProcessorDispatcher;
pub use knowledge::KnowledgeProcessor;
pub use processor::{ProcessOutput, Processor, ProcessorStats, ProcessorStatsSnapshot};
pub use registry::{ProcessorRegistry, ProcessorStatus};
