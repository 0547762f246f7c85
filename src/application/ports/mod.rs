//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod batch_api;
mod credential_store;
mod file_storage;
mod job_executor;
mod repositories;
mod task_supervisor;

pub use batch_api::{BatchApiError, BatchApiPort, BatchApiProvider, RemoteFile, RemoteJob};
pub use credential_store::{CredentialError, CredentialStorePort};
pub use file_storage::{FileStorageError, FileStoragePort, StoredFile};
pub use job_executor::{JobExecutorPort, RunOutcome, RunRequest};
pub use repositories::{
    job_mutator, FileRepositoryPort, JobMutator, JobStorePort, ProjectRepositoryPort,
    RepositoryError,
};
pub use task_supervisor::{SupervisedTask, TaskSupervisorPort};
