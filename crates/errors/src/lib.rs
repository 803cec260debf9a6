use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("文件处理记录未找到: {file_id}")]
    RecordNotFound { file_id: String },
    #[error("处理器未找到: {name}")]
    ProcessorNotFound { name: String },
    #[error("定时任务未找到: {task_id}")]
    TaskNotFound { task_id: String },
    #[error("非法状态转换: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },
    #[error("文件存储错误: {0}")]
    Storage(String),
    #[error("语音转写错误: {0}")]
    Transcription(String),
    #[error("知识库错误: {0}")]
    Knowledge(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn record_not_found<S: Into<String>>(file_id: S) -> Self {
        Self::RecordNotFound {
            file_id: file_id.into(),
        }
    }
    pub fn processor_not_found<S: Into<String>>(name: S) -> Self {
        Self::ProcessorNotFound { name: name.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn invalid_transition<A: ToString, B: ToString>(from: A, to: B) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Internal(_) | PipelineError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::DatabaseOperation(_)
                | PipelineError::MessageQueue(_)
                | PipelineError::Timeout(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            PipelineError::RecordNotFound { .. } => "请求的文件处理记录不存在",
            PipelineError::ProcessorNotFound { .. } => "请求的处理器不存在",
            PipelineError::TaskNotFound { .. } => "请求的定时任务不存在",
            PipelineError::InvalidStatusTransition { .. } => "文件状态不允许此操作",
            PipelineError::ValidationError(_) => "输入数据验证失败",
            PipelineError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}
