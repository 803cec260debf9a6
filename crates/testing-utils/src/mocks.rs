//! 仓储与协作方端口的内存Mock实现
//!
//! 不依赖数据库和外部服务，供各crate的单元测试使用。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use filepipe_domain::{
    FileProcessing, FileProcessingFilter, FileProcessingRepository, FileStorage,
    KnowledgeIndexer, KnowledgeMappingRepository, Message, MessageProducer, PipelineEvent,
    PipelineEventRepository, ProcessStatus, ScheduleRepository, TaskConfig, TaskExecution,
    Transcriber, Transcript,
};
use filepipe_errors::{PipelineError, PipelineResult};

#[derive(Clone, Default)]
pub struct MockFileProcessingRepository {
    records: Arc<Mutex<Vec<FileProcessing>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockFileProcessingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<FileProcessing>) -> Self {
        let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            records: Arc::new(Mutex::new(records)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn snapshot(&self) -> Vec<FileProcessing> {
        self.records.lock().unwrap().clone()
    }

    fn matches(record: &FileProcessing, filter: &FileProcessingFilter) -> bool {
        filter.status.map_or(true, |s| record.status == s)
            && filter.source_type.map_or(true, |s| record.source_type == s)
            && filter
                .file_type
                .as_ref()
                .map_or(true, |t| &record.file_type == t)
    }
}

#[async_trait]
impl FileProcessingRepository for MockFileProcessingRepository {
    async fn create(&self, record: &FileProcessing) -> PipelineResult<FileProcessing> {
        let mut records = self.records.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut created = record.clone();
        if created.id == 0 {
            created.id = *next_id;
            *next_id += 1;
        }
        records.push(created.clone());
        Ok(created)
    }

    async fn get_by_file_id(&self, file_id: &str) -> PipelineResult<Option<FileProcessing>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.file_id == file_id)
            .cloned())
    }

    async fn update_status(
        &self,
        file_id: &str,
        status: ProcessStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.file_id == file_id)
            .ok_or_else(|| PipelineError::record_not_found(file_id))?;
        if !record.status.can_transition_to(status) {
            return Err(PipelineError::invalid_transition(record.status, status));
        }
        record.status = status;
        if start_time.is_some() {
            record.start_time = start_time;
        }
        if end_time.is_some() {
            record.end_time = end_time;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, filter: &FileProcessingFilter) -> PipelineResult<Vec<FileProcessing>> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<_> = records
            .iter()
            .filter(|r| Self::matches(r, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let offset = filter.offset.unwrap_or(0) as usize;
        let matched: Vec<_> = matched.into_iter().skip(offset).collect();
        match filter.limit {
            Some(limit) => Ok(matched.into_iter().take(limit as usize).collect()),
            None => Ok(matched),
        }
    }

    async fn count(&self, filter: &FileProcessingFilter) -> PipelineResult<i64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| Self::matches(r, filter))
            .count() as i64)
    }

    async fn batch_update_status(
        &self,
        file_ids: &[String],
        status: ProcessStatus,
    ) -> PipelineResult<u64> {
        let mut records = self.records.lock().unwrap();
        let mut updated = 0;
        for record in records.iter_mut() {
            if file_ids.contains(&record.file_id) && record.status.can_transition_to(status) {
                record.status = status;
                record.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_by_file_id(&self, file_id: &str) -> PipelineResult<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.file_id != file_id);
        Ok(records.len() < before)
    }

    async fn status_statistics(&self) -> PipelineResult<HashMap<String, i64>> {
        let mut stats = HashMap::new();
        for record in self.records.lock().unwrap().iter() {
            *stats.entry(record.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn source_type_statistics(&self) -> PipelineResult<HashMap<String, i64>> {
        let mut stats = HashMap::new();
        for record in self.records.lock().unwrap().iter() {
            *stats
                .entry(record.source_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[derive(Clone, Default)]
pub struct MockPipelineEventRepository {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockPipelineEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineEventRepository for MockPipelineEventRepository {
    async fn record(&self, event: &PipelineEvent) -> PipelineResult<PipelineEvent> {
        let mut events = self.events.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut recorded = event.clone();
        recorded.id = *next_id;
        events.push(recorded.clone());
        Ok(recorded)
    }

    async fn has_success(
        &self,
        file_path: &str,
        processor_name: &str,
        file_hash: &str,
    ) -> PipelineResult<bool> {
        Ok(self.events.lock().unwrap().iter().any(|e| {
            e.file_path == file_path
                && e.processor_name == processor_name
                && e.file_hash.as_deref() == Some(file_hash)
                && e.is_success()
        }))
    }

    async fn find_by_file(&self, file_path: &str) -> PipelineResult<Vec<PipelineEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.file_path == file_path)
            .cloned()
            .collect())
    }

    async fn latest_result(
        &self,
        file_path: &str,
        processor_name: &str,
    ) -> PipelineResult<Option<PipelineEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.file_path == file_path && e.processor_name == processor_name)
            .last()
            .cloned())
    }
}

#[derive(Clone, Default)]
pub struct MockScheduleRepository {
    tasks: Arc<Mutex<HashMap<String, TaskConfig>>>,
    executions: Arc<Mutex<Vec<TaskExecution>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for MockScheduleRepository {
    async fn get_task(&self, task_id: &str) -> PipelineResult<Option<TaskConfig>> {
        Ok(self.tasks.lock().unwrap().get(task_id).cloned())
    }

    async fn save_task(&self, config: &TaskConfig) -> PipelineResult<TaskConfig> {
        let mut tasks = self.tasks.lock().unwrap();
        let saved = match tasks.get(&config.task_id) {
            // 已有任务保留用户设置的间隔和开关
            Some(existing) => {
                let mut merged = existing.clone();
                merged.task_name = config.task_name.clone();
                merged.description = config.description.clone();
                merged.updated_at = config.updated_at;
                merged
            }
            None => config.clone(),
        };
        tasks.insert(saved.task_id.clone(), saved.clone());
        Ok(saved)
    }

    async fn update_task(
        &self,
        task_id: &str,
        enabled: Option<bool>,
        interval_seconds: Option<i64>,
    ) -> PipelineResult<TaskConfig> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if let Some(enabled) = enabled {
            task.enabled = enabled;
        }
        if let Some(interval) = interval_seconds {
            task.interval_seconds = interval;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn list_tasks(&self) -> PipelineResult<Vec<TaskConfig>> {
        let mut tasks: Vec<_> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(tasks)
    }

    async fn record_execution(&self, execution: &TaskExecution) -> PipelineResult<TaskExecution> {
        let mut executions = self.executions.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut recorded = execution.clone();
        recorded.id = *next_id;
        executions.push(recorded.clone());
        Ok(recorded)
    }

    async fn executions(&self, task_id: &str, limit: i64) -> PipelineResult<Vec<TaskExecution>> {
        let executions = self.executions.lock().unwrap();
        let mut matched: Vec<_> = executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        matched.truncate(limit as usize);
        Ok(matched)
    }
}

#[derive(Clone, Default)]
pub struct MockKnowledgeMappingRepository {
    mappings: Arc<Mutex<HashMap<String, String>>>,
}

impl MockKnowledgeMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mapping(&self, source_id: &str, space_name: &str) {
        self.mappings
            .lock()
            .unwrap()
            .insert(source_id.to_string(), space_name.to_string());
    }
}

#[async_trait]
impl KnowledgeMappingRepository for MockKnowledgeMappingRepository {
    async fn space_for_source(&self, source_id: &str) -> PipelineResult<Option<String>> {
        Ok(self.mappings.lock().unwrap().get(source_id).cloned())
    }
}

/// 内存文件存储，file_id形如 "mem-1"
#[derive(Clone, Default)]
pub struct MockFileStorage {
    objects: Arc<Mutex<HashMap<String, (String, String, Vec<u8>)>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个对象并返回其file_id
    pub fn seed(&self, bucket: &str, file_name: &str, content: &[u8]) -> String {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let file_id = format!("mem-{next_id}");
        self.objects.lock().unwrap().insert(
            file_id.clone(),
            (bucket.to_string(), file_name.to_string(), content.to_vec()),
        );
        file_id
    }

    pub fn saved_names(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .filter(|(b, _, _)| b == bucket)
            .map(|(_, name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl FileStorage for MockFileStorage {
    async fn save(&self, bucket: &str, file_name: &str, content: &[u8]) -> PipelineResult<String> {
        Ok(self.seed(bucket, file_name, content))
    }

    async fn get(&self, file_id: &str) -> PipelineResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(file_id)
            .map(|(_, _, content)| content.clone())
            .ok_or_else(|| PipelineError::Storage(format!("对象不存在: {file_id}")))
    }

    async fn delete(&self, file_id: &str) -> PipelineResult<bool> {
        Ok(self.objects.lock().unwrap().remove(file_id).is_some())
    }
}

/// 固定文本的转写器，记录每次调用的路径
#[derive(Clone)]
pub struct MockTranscriber {
    pub transcript: String,
    pub duration_seconds: f64,
    calls: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

impl MockTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            duration_seconds: 10.0,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, path: &Path, _threshold: f64) -> PipelineResult<Transcript> {
        self.calls
            .lock()
            .unwrap()
            .push(path.to_string_lossy().to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::Transcription("转写引擎不可用".to_string()));
        }
        Ok(Transcript {
            text: self.transcript.clone(),
            duration_seconds: self.duration_seconds,
        })
    }
}

/// 记录空间与文档创建的知识库索引Mock
#[derive(Clone, Default)]
pub struct MockKnowledgeIndexer {
    spaces: Arc<Mutex<Vec<String>>>,
    documents: Arc<Mutex<Vec<(String, String, String)>>>,
    next_id: Arc<Mutex<i64>>,
    fail: Arc<AtomicBool>,
}

impl MockKnowledgeIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spaces(&self) -> Vec<String> {
        self.spaces.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<(String, String, String)> {
        self.documents.lock().unwrap().clone()
    }

    fn check_available(&self) -> PipelineResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::Knowledge("知识库服务不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeIndexer for MockKnowledgeIndexer {
    async fn create_space(&self, name: &str) -> PipelineResult<()> {
        self.check_available()?;
        let mut spaces = self.spaces.lock().unwrap();
        if !spaces.iter().any(|s| s == name) {
            spaces.push(name.to_string());
        }
        Ok(())
    }

    async fn create_document(
        &self,
        space: &str,
        doc_name: &str,
        content_file_id: &str,
    ) -> PipelineResult<String> {
        self.check_available()?;
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let doc_id = format!("doc-{next_id}");
        self.documents.lock().unwrap().push((
            space.to_string(),
            doc_name.to_string(),
            content_file_id.to_string(),
        ));
        Ok(doc_id)
    }

    async fn sync(&self, _space: &str, doc_id: &str) -> PipelineResult<Vec<String>> {
        self.check_available()?;
        Ok(vec![format!("{doc_id}-chunk-1")])
    }
}

/// 前N次发布失败的生产者，验证重试回退逻辑
pub struct FlakyProducer {
    remaining_failures: AtomicU32,
    publish_attempts: AtomicU32,
    connected: AtomicBool,
    published: Mutex<Vec<Message>>,
}

impl FlakyProducer {
    pub fn failing(times: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(times),
            publish_attempts: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageProducer for FlakyProducer {
    async fn connect(&self) -> PipelineResult<bool> {
        Ok(!self.connected.swap(true, Ordering::SeqCst))
    }

    async fn disconnect(&self) -> PipelineResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: &Message) -> PipelineResult<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.remaining_failures.load(Ordering::SeqCst) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::MessageQueue("模拟发布失败".to_string()));
        }
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn request(
        &self,
        _message: &Message,
        _timeout: Duration,
    ) -> PipelineResult<Option<Message>> {
        Ok(None)
    }
}
