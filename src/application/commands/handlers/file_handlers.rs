//! Batch File Command Handlers

use std::sync::Arc;

use crate::application::commands::{DeleteBatchFile, ImportBatchFile};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    FileRepositoryPort, FileStoragePort, JobStorePort, ProjectRepositoryPort, TaskSupervisorPort,
};
use crate::domain::batch::BatchInputFile;

// ============================================================================
// ImportBatchFile
// ============================================================================

/// ImportBatchFile Handler - 复制外部 JSONL 到项目目录并登记
pub struct ImportBatchFileHandler {
    project_repo: Arc<dyn ProjectRepositoryPort>,
    file_repo: Arc<dyn FileRepositoryPort>,
    storage: Arc<dyn FileStoragePort>,
}

impl ImportBatchFileHandler {
    pub fn new(
        project_repo: Arc<dyn ProjectRepositoryPort>,
        file_repo: Arc<dyn FileRepositoryPort>,
        storage: Arc<dyn FileStoragePort>,
    ) -> Self {
        Self {
            project_repo,
            file_repo,
            storage,
        }
    }

    pub async fn handle(&self, command: ImportBatchFile) -> Result<BatchInputFile, ApplicationError> {
        BatchInputFile::validate_source(&command.source)?;

        self.project_repo
            .find_by_id(command.project_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Project", command.project_id))?;

        let stored = self
            .storage
            .import_file(command.project_id, &command.source)
            .await?;
        let file = BatchInputFile::new(
            command.project_id,
            stored.display_name,
            stored.path,
            stored.size_bytes,
        );

        if let Err(e) = self.file_repo.save(&file).await {
            // 登记失败时不留下孤立副本
            if let Err(cleanup) = self.storage.delete_file(&file.local_path).await {
                tracing::warn!(path = %file.local_path.display(), error = %cleanup, "Failed to remove imported copy");
            }
            return Err(e.into());
        }

        tracing::info!(
            project_id = %file.project_id,
            file_id = %file.id,
            name = %file.display_name,
            size_bytes = file.size_bytes,
            "Batch file imported"
        );
        Ok(file)
    }
}

// ============================================================================
// DeleteBatchFile
// ============================================================================

/// DeleteBatchFile Handler
///
/// 顺序：停止 Runner → 删除任务记录 → 删除持久副本与结果 → 删除文件记录
///
/// 任务记录先删除，仍在退出中的 Runner 之后的提交会得到 `NotFound`
pub struct DeleteBatchFileHandler {
    file_repo: Arc<dyn FileRepositoryPort>,
    job_store: Arc<dyn JobStorePort>,
    storage: Arc<dyn FileStoragePort>,
    supervisor: Arc<dyn TaskSupervisorPort>,
}

impl DeleteBatchFileHandler {
    pub fn new(
        file_repo: Arc<dyn FileRepositoryPort>,
        job_store: Arc<dyn JobStorePort>,
        storage: Arc<dyn FileStoragePort>,
        supervisor: Arc<dyn TaskSupervisorPort>,
    ) -> Self {
        Self {
            file_repo,
            job_store,
            storage,
            supervisor,
        }
    }

    pub async fn handle(&self, command: DeleteBatchFile) -> Result<(), ApplicationError> {
        let file = self
            .file_repo
            .find_by_id(command.file_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("BatchInputFile", command.file_id))?;

        if let Some(job) = self.job_store.find_by_file(file.id).await? {
            self.supervisor.cancel(job.id);
            self.job_store.delete(job.id).await?;
        }

        self.storage.delete_file(&file.local_path).await?;
        if let Some(result_path) = &file.result_path {
            self.storage.delete_file(result_path).await?;
        }
        self.file_repo.delete(file.id).await?;

        tracing::info!(
            file_id = %file.id,
            name = %file.display_name,
            "Batch file deleted"
        );
        Ok(())
    }
}
