//! Batch Query Handlers

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::error::ApplicationError;
use crate::application::ports::{FileRepositoryPort, JobStorePort, ProjectRepositoryPort};
use crate::application::queries::{GetBatchJob, ListProjectFiles};
use crate::domain::batch::{
    effective_status, BatchInputFile, BatchJob, BatchJobStatus, StatusMessage, TokenUsage,
};

// ============================================================================
// Response DTOs
// ============================================================================

/// 任务详情响应
///
/// `status` 是有效状态：超过 48 小时的任务报告为 `expired`，记录本身不被改写
#[derive(Debug, Clone)]
pub struct BatchJobResponse {
    pub id: Uuid,
    pub file_id: Uuid,
    pub remote_name: Option<String>,
    pub status: BatchJobStatus,
    /// 记录中保存的状态
    pub stored_status: BatchJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub result_file_name: Option<String>,
    pub token_usage: TokenUsage,
    pub messages: Vec<StatusMessage>,
}

impl BatchJobResponse {
    fn from_job(job: BatchJob, now: DateTime<Utc>) -> Self {
        Self {
            status: effective_status(&job, now),
            stored_status: job.status,
            id: job.id,
            file_id: job.file_id,
            remote_name: job.remote_name,
            started_at: job.started_at,
            result_file_name: job.result_file_name,
            token_usage: job.token_usage,
            messages: job.messages,
        }
    }
}

/// 任务摘要
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: BatchJobStatus,
    pub last_message: Option<StatusMessage>,
}

/// 项目文件列表项
#[derive(Debug, Clone)]
pub struct ProjectFileResponse {
    pub id: Uuid,
    pub display_name: String,
    pub size_bytes: u64,
    pub imported_at: DateTime<Utc>,
    pub remote_name: Option<String>,
    pub result_path: Option<PathBuf>,
    pub job: Option<JobSummary>,
}

impl ProjectFileResponse {
    fn new(file: BatchInputFile, job: Option<BatchJob>, now: DateTime<Utc>) -> Self {
        Self {
            id: file.id,
            display_name: file.display_name,
            size_bytes: file.size_bytes,
            imported_at: file.imported_at,
            remote_name: file.remote_name,
            result_path: file.result_path,
            job: job.map(|job| JobSummary {
                job_id: job.id,
                status: effective_status(&job, now),
                last_message: job.messages.last().cloned(),
            }),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GetBatchJob Handler
pub struct GetBatchJobHandler {
    file_repo: Arc<dyn FileRepositoryPort>,
    job_store: Arc<dyn JobStorePort>,
}

impl GetBatchJobHandler {
    pub fn new(file_repo: Arc<dyn FileRepositoryPort>, job_store: Arc<dyn JobStorePort>) -> Self {
        Self {
            file_repo,
            job_store,
        }
    }

    pub async fn handle(&self, query: GetBatchJob) -> Result<BatchJobResponse, ApplicationError> {
        self.file_repo
            .find_by_id(query.file_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("BatchInputFile", query.file_id))?;

        let job = self
            .job_store
            .find_by_file(query.file_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("BatchJob", query.file_id))?;

        Ok(BatchJobResponse::from_job(job, Utc::now()))
    }
}

/// ListProjectFiles Handler
pub struct ListProjectFilesHandler {
    project_repo: Arc<dyn ProjectRepositoryPort>,
    file_repo: Arc<dyn FileRepositoryPort>,
    job_store: Arc<dyn JobStorePort>,
}

impl ListProjectFilesHandler {
    pub fn new(
        project_repo: Arc<dyn ProjectRepositoryPort>,
        file_repo: Arc<dyn FileRepositoryPort>,
        job_store: Arc<dyn JobStorePort>,
    ) -> Self {
        Self {
            project_repo,
            file_repo,
            job_store,
        }
    }

    pub async fn handle(
        &self,
        query: ListProjectFiles,
    ) -> Result<Vec<ProjectFileResponse>, ApplicationError> {
        self.project_repo
            .find_by_id(query.project_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Project", query.project_id))?;

        let now = Utc::now();
        let files = self.file_repo.find_by_project(query.project_id).await?;
        let mut responses = Vec::with_capacity(files.len());
        for file in files {
            let job = self.job_store.find_by_file(file.id).await?;
            responses.push(ProjectFileResponse::new(file, job, now));
        }
        Ok(responses)
    }
}
