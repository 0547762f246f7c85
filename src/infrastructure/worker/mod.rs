//! Worker Layer - Background Task Processing
//!
//! 实现 JobRunner，驱动批处理任务的上传、创建与轮询

mod job_runner;

pub use job_runner::{JobRunner, JobRunnerConfig};
