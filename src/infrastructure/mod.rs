//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现

pub mod adapters;
pub mod events;
pub mod memory;
pub mod persistence;
pub mod state;
pub mod worker;

pub use events::EventPublisher;
pub use memory::{InMemoryCredentialStore, InMemoryTaskSupervisor};
pub use state::{AppPorts, AppState};
pub use worker::{JobRunner, JobRunnerConfig};
