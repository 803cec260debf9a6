//! 回调执行调度
//!
//! 按处理器声明的执行方式选择运行环境：异步回调直接在运行时上执行，
//! 阻塞回调通过 `spawn_blocking` 执行并受工作池容量限制。

use std::sync::Arc;

use tokio::sync::Semaphore;

use filepipe_domain::{ExecutionMode, Message, MessageHandler};
use filepipe_errors::{PipelineError, PipelineResult};

/// 阻塞回调工作池的默认容量
pub const DEFAULT_BLOCKING_WORKERS: usize = 10;

#[derive(Clone)]
pub struct HandlerDispatcher {
    blocking_slots: Arc<Semaphore>,
}

impl HandlerDispatcher {
    pub fn new(blocking_workers: usize) -> Self {
        Self {
            blocking_slots: Arc::new(Semaphore::new(blocking_workers)),
        }
    }

    /// 执行回调并等待完成
    pub async fn dispatch(
        &self,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) -> PipelineResult<()> {
        match handler.execution_mode() {
            ExecutionMode::Async => handler.handle(message).await,
            ExecutionMode::Blocking => {
                let permit = self
                    .blocking_slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| {
                        PipelineError::Internal(format!("阻塞工作池已关闭: {e}"))
                    })?;
                let runtime = tokio::runtime::Handle::current();
                let result = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    runtime.block_on(handler.handle(message))
                })
                .await
                .map_err(|e| PipelineError::Internal(format!("阻塞回调任务失败: {e}")))?;
                result
            }
        }
    }
}

impl Default for HandlerDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKING_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use filepipe_domain::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        mode: ExecutionMode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        fn execution_mode(&self) -> ExecutionMode {
            self.mode
        }
        async fn handle(&self, _message: Message) -> PipelineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_both_modes() {
        let dispatcher = HandlerDispatcher::default();
        for mode in [ExecutionMode::Async, ExecutionMode::Blocking] {
            let handler = Arc::new(CountingHandler {
                mode,
                calls: AtomicUsize::new(0),
            });
            let message =
                Message::point_to_point("test", &Payload::Text("hello".to_string())).unwrap();
            dispatcher
                .dispatch(handler.clone(), message)
                .await
                .unwrap();
            assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        }
    }
}
