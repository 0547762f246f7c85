//! Project Command Handlers

use std::sync::Arc;

use crate::application::commands::{CreateProject, DeleteProject, SetProjectApiKey};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    CredentialStorePort, FileRepositoryPort, FileStoragePort, JobStorePort,
    ProjectRepositoryPort, TaskSupervisorPort,
};
use crate::domain::project::{Project, ProjectName};

// ============================================================================
// CreateProject
// ============================================================================

/// CreateProject Handler
pub struct CreateProjectHandler {
    project_repo: Arc<dyn ProjectRepositoryPort>,
    default_model: String,
}

impl CreateProjectHandler {
    pub fn new(project_repo: Arc<dyn ProjectRepositoryPort>, default_model: impl Into<String>) -> Self {
        Self {
            project_repo,
            default_model: default_model.into(),
        }
    }

    pub async fn handle(&self, command: CreateProject) -> Result<Project, ApplicationError> {
        // 名称校验在本地完成，不访问网络
        let name = ProjectName::new(command.name)?;
        let model = command.model.unwrap_or_else(|| self.default_model.clone());
        let project = Project::new(name, model)?;

        self.project_repo.save(&project).await?;

        tracing::info!(
            project_id = %project.id,
            name = %project.name,
            model = %project.model,
            "Project created"
        );
        Ok(project)
    }
}

// ============================================================================
// SetProjectApiKey
// ============================================================================

/// SetProjectApiKey Handler
pub struct SetProjectApiKeyHandler {
    project_repo: Arc<dyn ProjectRepositoryPort>,
    credentials: Arc<dyn CredentialStorePort>,
}

impl SetProjectApiKeyHandler {
    pub fn new(
        project_repo: Arc<dyn ProjectRepositoryPort>,
        credentials: Arc<dyn CredentialStorePort>,
    ) -> Self {
        Self {
            project_repo,
            credentials,
        }
    }

    pub async fn handle(&self, command: SetProjectApiKey) -> Result<(), ApplicationError> {
        let api_key = command.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(ApplicationError::validation("API key must not be empty"));
        }

        self.project_repo
            .find_by_id(command.project_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Project", command.project_id))?;

        self.credentials.set_api_key(command.project_id, api_key)?;
        tracing::info!(project_id = %command.project_id, "Project API key updated");
        Ok(())
    }
}

// ============================================================================
// DeleteProject
// ============================================================================

/// DeleteProject Handler
///
/// 先停止项目下所有 Runner，再删除目录与记录
pub struct DeleteProjectHandler {
    project_repo: Arc<dyn ProjectRepositoryPort>,
    file_repo: Arc<dyn FileRepositoryPort>,
    job_store: Arc<dyn JobStorePort>,
    storage: Arc<dyn FileStoragePort>,
    credentials: Arc<dyn CredentialStorePort>,
    supervisor: Arc<dyn TaskSupervisorPort>,
}

impl DeleteProjectHandler {
    pub fn new(
        project_repo: Arc<dyn ProjectRepositoryPort>,
        file_repo: Arc<dyn FileRepositoryPort>,
        job_store: Arc<dyn JobStorePort>,
        storage: Arc<dyn FileStoragePort>,
        credentials: Arc<dyn CredentialStorePort>,
        supervisor: Arc<dyn TaskSupervisorPort>,
    ) -> Self {
        Self {
            project_repo,
            file_repo,
            job_store,
            storage,
            credentials,
            supervisor,
        }
    }

    pub async fn handle(&self, command: DeleteProject) -> Result<(), ApplicationError> {
        let project_id = command.project_id;
        let project = self
            .project_repo
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Project", project_id))?;

        let files = self.file_repo.find_by_project(project_id).await?;
        let mut cancelled = 0;
        for file in &files {
            if let Some(job) = self.job_store.find_by_file(file.id).await? {
                if self.supervisor.cancel(job.id) {
                    cancelled += 1;
                }
            }
        }

        self.storage.delete_project_dir(project_id).await?;
        self.project_repo.delete(project_id).await?;
        self.credentials.delete_api_key(project_id)?;

        tracing::info!(
            project_id = %project_id,
            name = %project.name,
            files = files.len(),
            cancelled_runners = cancelled,
            "Project deleted"
        );
        Ok(())
    }
}
