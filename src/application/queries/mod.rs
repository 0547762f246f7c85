//! 应用层 - 查询（读操作）
//!
//! CQRS 查询侧：处理所有读操作，不写入任何记录

mod batch_queries;

pub mod handlers;

pub use batch_queries::*;
