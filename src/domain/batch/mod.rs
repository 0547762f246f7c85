//! Batch Context - 批处理限界上下文
//!
//! 职责:
//! - 输入文件实体与远端上传元数据
//! - 批处理任务聚合与状态消息
//! - 任务状态机（纯逻辑，无 I/O）

mod errors;
mod file;
mod job;
pub mod state_machine;
mod status;

pub use errors::BatchDomainError;
pub use file::{BatchInputFile, INPUT_FILE_EXTENSION};
pub use job::{BatchJob, MessageSeverity, StatusMessage, TokenUsage};
pub use state_machine::{
    effective_status, is_job_expired, next_step, remote_ttl, transition, JobEvent, RunStep,
};
pub use status::{BatchJobStatus, RemoteFileStatus};
