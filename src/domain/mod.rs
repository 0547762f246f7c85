//! Domain Layer - 领域层
//!
//! 包含两个限界上下文:
//! - Batch Context: 输入文件、批处理任务、状态机
//! - Project Context: 项目（文件归属与模型选择）

pub mod batch;
pub mod project;
