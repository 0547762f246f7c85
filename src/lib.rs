//! batchdesk - Gemini Batch 任务编排
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Project Context: 项目与模型
//! - Batch Context: 输入文件、任务状态机、有效状态
//!
//! 应用层 (application/):
//! - Ports: 端口定义（JobStore, BatchApi, FileStorage, CredentialStore, TaskSupervisor）
//! - Commands: CQRS 命令处理器
//! - Queries: CQRS 查询处理器
//!
//! 基础设施层 (infrastructure/):
//! - Worker: JobRunner 驱动单个任务到终态
//! - Memory: TaskSupervisor, CredentialStore 内存实现
//! - Persistence: SQLite 存储
//! - Adapters: Batch API 客户端, 本地文件存储
//! - Events: 任务事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
