use std::sync::Arc;

use tracing::{debug, info};

use filepipe_config::{MessageQueueConfig, MessageQueueType};
use filepipe_domain::QueueManager;
use filepipe_errors::PipelineResult;

use crate::{InMemoryQueueManager, RabbitMqManager};

pub struct QueueFactory;

impl QueueFactory {
    pub fn create(config: &MessageQueueConfig) -> PipelineResult<Arc<dyn QueueManager>> {
        debug!("Creating queue manager with type: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("Initializing RabbitMQ queue manager");
                Ok(Arc::new(RabbitMqManager::new(config.clone())))
            }
            MessageQueueType::InMemory => {
                info!("Initializing in-memory queue manager");
                Ok(Arc::new(InMemoryQueueManager::new(config.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory_manager() {
        let config = MessageQueueConfig::in_memory_default();
        let manager = QueueFactory::create(&config).unwrap();
        let producer = manager.producer().await.unwrap();
        assert!(producer.is_connected().await);
        manager.shutdown().await.unwrap();
    }
}
