pub mod sqlite;

pub use sqlite::{
    DatabaseManager, SqliteFileProcessingRepository, SqliteKnowledgeMappingRepository,
    SqlitePipelineEventRepository, SqliteScheduleRepository,
};
