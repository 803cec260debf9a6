//! 测试工具集
//!
//! 提供仓储与外部协作方的Mock实现和常用测试数据构造器。

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
