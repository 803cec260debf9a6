//! 外部协作方的本地实现
//!
//! 单机部署形态：文件存到本地目录，转写走外部命令，
//! 知识库落地为目录结构。分布式部署时换成各自的远端实现。

mod knowledge;
mod storage;
mod transcribe;

pub use knowledge::LocalKnowledgeIndexer;
pub use storage::LocalFileStorage;
pub use transcribe::CommandTranscriber;
