//! Repository Ports - 出站端口
//!
//! 定义数据持久化的抽象接口
//! 具体实现在 infrastructure 层（SQLite）

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::batch::{BatchDomainError, BatchInputFile, BatchJob};
use crate::domain::project::Project;

/// Repository 错误
///
/// `NotFound`（记录不存在）与 `SaveFailed`（写入被拒绝）必须可区分
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Update rejected: {0}")]
    Rejected(#[from] BatchDomainError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// ============================================================================
// Batch Job Store
// ============================================================================

/// 单条记录上的原子修改
pub type JobMutator = Box<dyn FnOnce(&mut BatchJob) -> Result<(), BatchDomainError> + Send>;

/// 把闭包装箱为 [`JobMutator`]
pub fn job_mutator<F>(f: F) -> JobMutator
where
    F: FnOnce(&mut BatchJob) -> Result<(), BatchDomainError> + Send + 'static,
{
    Box::new(f)
}

/// Durable Job Store Port
///
/// 每条记录的读-改-写是原子的；存储本身不提供跨记录的锁，
/// 同一任务的写入方由 TaskSupervisor 保证唯一。
#[async_trait]
pub trait JobStorePort: Send + Sync {
    /// 插入新任务
    async fn insert(&self, job: &BatchJob) -> Result<(), RepositoryError>;

    /// 根据 ID 查找任务
    async fn get(&self, id: Uuid) -> Result<Option<BatchJob>, RepositoryError>;

    /// 根据输入文件查找任务
    async fn find_by_file(&self, file_id: Uuid) -> Result<Option<BatchJob>, RepositoryError>;

    /// 原子更新：读取、应用 mutator、写回
    ///
    /// mutator 返回错误时不写入任何内容
    async fn update(&self, id: Uuid, mutator: JobMutator) -> Result<BatchJob, RepositoryError>;

    /// 删除任务
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// 丢弃文件的旧任务并插入新任务（原子）
    async fn replace_for_file(&self, fresh: &BatchJob) -> Result<(), RepositoryError>;

    /// 获取远端仍在进行中的任务（pending / running）
    async fn find_active(&self) -> Result<Vec<BatchJob>, RepositoryError>;
}

// ============================================================================
// Batch Input File Repository
// ============================================================================

/// Input File Repository Port
#[async_trait]
pub trait FileRepositoryPort: Send + Sync {
    /// 保存新文件记录
    async fn save(&self, file: &BatchInputFile) -> Result<(), RepositoryError>;

    /// 根据 ID 查找
    async fn find_by_id(&self, id: Uuid) -> Result<Option<BatchInputFile>, RepositoryError>;

    /// 获取项目的所有文件
    async fn find_by_project(&self, project_id: Uuid)
        -> Result<Vec<BatchInputFile>, RepositoryError>;

    /// 更新文件记录
    async fn update(&self, file: &BatchInputFile) -> Result<(), RepositoryError>;

    /// 删除文件记录（级联删除任务）
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}

// ============================================================================
// Project Repository
// ============================================================================

/// Project Repository Port
#[async_trait]
pub trait ProjectRepositoryPort: Send + Sync {
    /// 保存项目
    async fn save(&self, project: &Project) -> Result<(), RepositoryError>;

    /// 根据 ID 查找项目
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, RepositoryError>;

    /// 获取所有项目
    async fn find_all(&self) -> Result<Vec<Project>, RepositoryError>;

    /// 更新项目
    async fn update(&self, project: &Project) -> Result<(), RepositoryError>;

    /// 删除项目（级联删除文件与任务）
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}
