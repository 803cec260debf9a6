//! 流水线编排层
//!
//! 处理器生命周期管理、文件路由、重新投递和间隔调度。

pub mod manager;
pub mod routing;
pub mod scheduler;

pub use manager::{ControlAction, HealthReport, HealthState, PipelineManager, ReprocessReport};
pub use scheduler::{SchedulerService, TaskFn};
