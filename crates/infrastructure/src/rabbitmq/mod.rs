pub mod consumer;
pub mod manager;
pub mod producer;

pub use consumer::RabbitMqConsumer;
pub use manager::RabbitMqManager;
pub use producer::RabbitMqProducer;
