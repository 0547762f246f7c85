//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（Batch API、Repository、TaskSupervisor、JobExecutor 等）
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    // Project commands
    CreateProject,
    DeleteProject,
    SetProjectApiKey,
    // File commands
    DeleteBatchFile,
    ImportBatchFile,
    // Job commands
    CancelBatchJob,
    DownloadBatchResults,
    RetryBatchJob,
    RunBatchJob,
    // Handlers
    handlers::{
        CancelBatchJobHandler, CreateProjectHandler, DeleteBatchFileHandler,
        DeleteProjectHandler, DownloadBatchResultsHandler, DownloadBatchResultsResponse,
        ImportBatchFileHandler, JobCommandContext, RetryBatchJobHandler, RunBatchJobHandler,
        RunBatchJobResponse, SetProjectApiKeyHandler,
    },
};

pub use error::{ApplicationError, BatchJobError};

pub use ports::{
    // Batch API
    BatchApiError,
    BatchApiPort,
    BatchApiProvider,
    RemoteFile,
    RemoteJob,
    // Credentials
    CredentialError,
    CredentialStorePort,
    // File storage
    FileStorageError,
    FileStoragePort,
    StoredFile,
    // Job executor
    JobExecutorPort,
    RunOutcome,
    RunRequest,
    // Repositories
    job_mutator,
    FileRepositoryPort,
    JobMutator,
    JobStorePort,
    ProjectRepositoryPort,
    RepositoryError,
    // Task supervisor
    SupervisedTask,
    TaskSupervisorPort,
};

pub use queries::{
    GetBatchJob,
    ListProjectFiles,
    // Handlers
    handlers::{
        BatchJobResponse, GetBatchJobHandler, JobSummary, ListProjectFilesHandler,
        ProjectFileResponse,
    },
};
