//! 应用层错误定义
//!
//! 统一的命令/查询错误类型，以及 JobRunner 的错误分类

use thiserror::Error;
use uuid::Uuid;

use crate::application::ports::{
    BatchApiError, CredentialError, FileStorageError, RepositoryError,
};
use crate::domain::batch::{BatchDomainError, BatchJobStatus};
use crate::domain::project::ProjectError;

/// JobRunner 错误
///
/// 每个错误在返回前都已作为 `error` 消息追加到任务日志中
#[derive(Debug, Error)]
pub enum BatchJobError {
    #[error("Batch job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Input file not stored: {0}")]
    FileNotStored(String),

    #[error("File could not be uploaded: {0}")]
    FileCouldNotBeUploaded(String),

    #[error("Batch job could not be created: {0}")]
    BatchJobCouldNotBeCreated(String),

    #[error("Batch job could not be fetched: {0}")]
    BatchJobCouldNotBeFetched(String),

    #[error("Batch job not completed (status: {0})")]
    BatchJobNotCompleted(BatchJobStatus),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] FileStorageError),
}

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: Uuid,
    },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 状态无效
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 仓储错误
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),

    /// 凭据错误
    #[error("Credential error: {0}")]
    CredentialError(#[from] CredentialError),

    /// 外部服务错误
    #[error("External service error: {0}")]
    ExternalServiceError(#[from] BatchApiError),

    /// 存储错误
    #[error("Storage error: {0}")]
    StorageError(#[from] FileStorageError),

    /// 任务执行错误
    #[error(transparent)]
    BatchJob(#[from] BatchJobError),
}

impl ApplicationError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource_type, id }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建状态无效错误
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

impl From<ProjectError> for ApplicationError {
    fn from(err: ProjectError) -> Self {
        Self::ValidationError(err.to_string())
    }
}

impl From<BatchDomainError> for ApplicationError {
    fn from(err: BatchDomainError) -> Self {
        match err {
            BatchDomainError::InvalidFileType(_) => Self::ValidationError(err.to_string()),
            _ => Self::InvalidState(err.to_string()),
        }
    }
}
