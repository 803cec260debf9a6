pub mod app_config;
pub mod database;
pub mod message_queue;
pub mod pipeline;
pub mod scheduler;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use pipeline::PipelineConfig;
pub use scheduler::SchedulerConfig;
