//! Memory Layer - In-Memory State Management
//!
//! 任务运行注册表与进程内凭据存储

mod credential_store;
mod task_supervisor;

pub use credential_store::InMemoryCredentialStore;
pub use task_supervisor::InMemoryTaskSupervisor;
