pub mod entities;
pub mod messaging;
pub mod ports;
pub mod repositories;

pub use entities::*;
pub use filepipe_errors::{PipelineError, PipelineResult};
pub use messaging::*;
pub use ports::*;
pub use repositories::*;
