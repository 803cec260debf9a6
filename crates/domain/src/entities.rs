use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 文件处理状态
///
/// 合法转换见 `can_transition_to`，其余转换一律拒绝。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    #[serde(rename = "wait")]
    Wait,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "retrying")]
    Retrying,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Wait => "wait",
            ProcessStatus::Downloading => "downloading",
            ProcessStatus::Processing => "processing",
            ProcessStatus::Success => "success",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Retrying => "retrying",
        }
    }

    /// 目标状态允许的前置状态，用于SQL条件更新
    pub fn valid_priors(&self) -> &'static [ProcessStatus] {
        match self {
            // wait 只作为初始状态，不能转入
            ProcessStatus::Wait => &[],
            ProcessStatus::Downloading => &[ProcessStatus::Wait],
            // processing 允许自转换：进程崩溃后重投的消息要能重新认领记录
            ProcessStatus::Processing => &[
                ProcessStatus::Wait,
                ProcessStatus::Downloading,
                ProcessStatus::Processing,
                ProcessStatus::Retrying,
            ],
            ProcessStatus::Success => &[ProcessStatus::Processing],
            ProcessStatus::Failed => &[ProcessStatus::Processing],
            ProcessStatus::Retrying => &[ProcessStatus::Failed],
        }
    }

    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        next.valid_priors().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Success)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for ProcessStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ProcessStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "wait" => Ok(ProcessStatus::Wait),
            "downloading" => Ok(ProcessStatus::Downloading),
            "processing" => Ok(ProcessStatus::Processing),
            "success" => Ok(ProcessStatus::Success),
            "failed" => Ok(ProcessStatus::Failed),
            "retrying" => Ok(ProcessStatus::Retrying),
            _ => Err(format!("Invalid process status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ProcessStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 文件来源类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceType {
    #[serde(rename = "ftp")]
    Ftp,
    #[serde(rename = "stt")]
    Stt,
    #[serde(rename = "local")]
    Local,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ftp => "ftp",
            SourceType::Stt => "stt",
            SourceType::Local => "local",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for SourceType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SourceType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "ftp" => Ok(SourceType::Ftp),
            "stt" => Ok(SourceType::Stt),
            "local" => Ok(SourceType::Local),
            _ => Err(format!("Invalid source type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SourceType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 文件处理记录
///
/// `file_id` 是幂等键，全局唯一；状态转换通过仓储层的条件更新持久化。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileProcessing {
    pub id: i64,
    pub file_id: String,
    pub file_name: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub source_file_id: Option<String>,
    pub file_type: String,
    pub size: Option<i64>,
    pub file_hash: Option<String>,
    pub status: ProcessStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileProcessing {
    pub fn new(
        file_id: String,
        file_name: String,
        source_type: SourceType,
        source_id: String,
        file_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            file_id,
            file_name,
            source_type,
            source_id,
            source_file_id: None,
            file_type,
            size: None,
            file_hash: None,
            status: ProcessStatus::Wait,
            start_time: None,
            end_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_hash(mut self, file_hash: String) -> Self {
        self.file_hash = Some(file_hash);
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_source_file_id(mut self, source_file_id: String) -> Self {
        self.source_file_id = Some(source_file_id);
        self
    }

    /// 文件扩展名（小写，含点），如 ".mp3"
    pub fn extension(&self) -> Option<String> {
        let name = &self.file_name;
        name.rfind('.')
            .filter(|idx| *idx > 0)
            .map(|idx| name[idx..].to_lowercase())
    }

    pub fn file_stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => &self.file_name[..idx],
            _ => &self.file_name,
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "文件处理记录 '{}' (file_id: {}, 来源: {})",
            self.file_name, self.file_id, self.source_type
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileProcessingFilter {
    pub status: Option<ProcessStatus>,
    pub source_type: Option<SourceType>,
    pub file_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 处理结果分类
///
/// SKIPPED 表示幂等检查命中，是正常结果而非错误。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProcessResult {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "partial")]
    Partial,
}

impl ProcessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessResult::Success => "success",
            ProcessResult::Failed => "failed",
            ProcessResult::Skipped => "skipped",
            ProcessResult::Partial => "partial",
        }
    }
}

impl std::fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for ProcessResult {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ProcessResult {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "success" => Ok(ProcessResult::Success),
            "failed" => Ok(ProcessResult::Failed),
            "skipped" => Ok(ProcessResult::Skipped),
            "partial" => Ok(ProcessResult::Partial),
            _ => Err(format!("Invalid process result: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ProcessResult {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 处理审计事件（仅追加）
///
/// 幂等判定以此为准：同一 (file_path, processor_name, file_hash)
/// 存在 success 事件即视为已处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: i64,
    pub file_path: String,
    pub event_type: String,
    pub processor_name: String,
    pub result: ProcessResult,
    pub metadata: serde_json::Value,
    pub output_files: Vec<String>,
    pub file_hash: Option<String>,
    pub created_time: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        file_path: String,
        event_type: String,
        processor_name: String,
        result: ProcessResult,
    ) -> Self {
        Self {
            id: 0, // 将由数据库生成
            file_path,
            event_type,
            processor_name,
            result,
            metadata: serde_json::Value::Null,
            output_files: Vec::new(),
            file_hash: None,
            created_time: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_output_files(mut self, output_files: Vec<String>) -> Self {
        self.output_files = output_files;
        self
    }

    pub fn with_hash(mut self, file_hash: Option<String>) -> Self {
        self.file_hash = file_hash;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ProcessResult::Success)
    }
}

/// 定时任务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub task_id: String,
    pub task_name: String,
    pub description: String,
    pub interval_seconds: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskConfig {
    pub fn new(
        task_id: String,
        task_name: String,
        description: String,
        interval_seconds: i64,
        enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            task_name,
            description,
            interval_seconds,
            enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskExecutionStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecutionStatus::Running => "running",
            TaskExecutionStatus::Success => "success",
            TaskExecutionStatus::Failed => "failed",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "running" => Ok(TaskExecutionStatus::Running),
            "success" => Ok(TaskExecutionStatus::Success),
            "failed" => Ok(TaskExecutionStatus::Failed),
            _ => Err(format!("Invalid task execution status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 定时任务执行历史（仅追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskExecutionStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
}

impl TaskExecution {
    pub fn started(task_id: String) -> Self {
        Self {
            id: 0, // 将由数据库生成
            task_id,
            start_time: Utc::now(),
            end_time: None,
            status: TaskExecutionStatus::Running,
            error_message: None,
            execution_time_ms: None,
        }
    }

    pub fn finish(&mut self, result: Result<(), String>) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.execution_time_ms = Some((now - self.start_time).num_milliseconds());
        match result {
            Ok(()) => self.status = TaskExecutionStatus::Success,
            Err(message) => {
                self.status = TaskExecutionStatus::Failed;
                self.error_message = Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(ProcessStatus::Wait.can_transition_to(ProcessStatus::Downloading));
        assert!(ProcessStatus::Wait.can_transition_to(ProcessStatus::Processing));
        assert!(ProcessStatus::Downloading.can_transition_to(ProcessStatus::Processing));
        assert!(ProcessStatus::Processing.can_transition_to(ProcessStatus::Success));
        assert!(ProcessStatus::Processing.can_transition_to(ProcessStatus::Failed));
        assert!(ProcessStatus::Failed.can_transition_to(ProcessStatus::Retrying));
        assert!(ProcessStatus::Retrying.can_transition_to(ProcessStatus::Processing));
        // 崩溃恢复：卡在 processing 的记录可以被重新认领
        assert!(ProcessStatus::Processing.can_transition_to(ProcessStatus::Processing));
    }

    #[test]
    fn test_invalid_transitions() {
        // processing 不能回退到 wait
        assert!(!ProcessStatus::Processing.can_transition_to(ProcessStatus::Wait));
        assert!(!ProcessStatus::Success.can_transition_to(ProcessStatus::Processing));
        assert!(!ProcessStatus::Wait.can_transition_to(ProcessStatus::Success));
        assert!(!ProcessStatus::Failed.can_transition_to(ProcessStatus::Processing));
        assert!(!ProcessStatus::Downloading.can_transition_to(ProcessStatus::Wait));
    }

    #[test]
    fn test_file_extension() {
        let record = FileProcessing::new(
            "f1".to_string(),
            "Meeting_Notes.MP3".to_string(),
            SourceType::Ftp,
            "src-1".to_string(),
            ".mp3".to_string(),
        );
        assert_eq!(record.extension(), Some(".mp3".to_string()));
        assert_eq!(record.file_stem(), "Meeting_Notes");

        let hidden = FileProcessing::new(
            "f2".to_string(),
            ".gitignore".to_string(),
            SourceType::Local,
            "src-1".to_string(),
            "".to_string(),
        );
        assert_eq!(hidden.extension(), None);
        assert_eq!(hidden.file_stem(), ".gitignore");
    }

    #[test]
    fn test_task_execution_finish() {
        let mut execution = TaskExecution::started("file_scan".to_string());
        assert_eq!(execution.status, TaskExecutionStatus::Running);
        execution.finish(Err("磁盘不可用".to_string()));
        assert_eq!(execution.status, TaskExecutionStatus::Failed);
        assert_eq!(execution.error_message.as_deref(), Some("磁盘不可用"));
        assert!(execution.end_time.is_some());
        assert!(execution.execution_time_ms.is_some());
    }
}
