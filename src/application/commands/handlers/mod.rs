//! Command Handlers 实现
//!
//! 所有 CommandHandler 的具体实现

mod file_handlers;
mod job_handlers;
mod project_handlers;

pub use file_handlers::*;
pub use job_handlers::*;
pub use project_handlers::*;
