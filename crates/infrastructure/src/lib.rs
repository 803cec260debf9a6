pub mod collaborators;
pub mod database;
pub mod dispatch;
pub mod in_memory;
pub mod queue_factory;
pub mod rabbitmq;

pub use collaborators::{CommandTranscriber, LocalFileStorage, LocalKnowledgeIndexer};
pub use database::*;
pub use dispatch::HandlerDispatcher;
pub use in_memory::{InMemoryBroker, InMemoryConsumer, InMemoryProducer, InMemoryQueueManager};
pub use queue_factory::QueueFactory;
pub use rabbitmq::{RabbitMqConsumer, RabbitMqManager, RabbitMqProducer};
