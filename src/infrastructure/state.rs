//! Application State
//!
//! 进程启动时构建一次，持有所有端口实现与 Command/Query Handlers

use chrono::Utc;
use std::sync::Arc;

use crate::application::{
    job_mutator, ApplicationError,
    // Command handlers
    CancelBatchJobHandler, CreateProjectHandler, DeleteBatchFileHandler, DeleteProjectHandler,
    DownloadBatchResultsHandler, ImportBatchFileHandler, JobCommandContext, RetryBatchJobHandler,
    RunBatchJob, RunBatchJobHandler, SetProjectApiKeyHandler,
    // Query handlers
    GetBatchJobHandler, ListProjectFilesHandler,
    // Ports
    BatchApiProvider, CredentialStorePort, FileRepositoryPort, FileStoragePort, JobStorePort,
    ProjectRepositoryPort, TaskSupervisorPort,
};
use crate::domain::batch::MessageSeverity;
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::worker::{JobRunner, JobRunnerConfig};

/// 构建 [`AppState`] 所需的端口实现
pub struct AppPorts {
    pub project_repo: Arc<dyn ProjectRepositoryPort>,
    pub file_repo: Arc<dyn FileRepositoryPort>,
    pub job_store: Arc<dyn JobStorePort>,
    pub storage: Arc<dyn FileStoragePort>,
    pub credentials: Arc<dyn CredentialStorePort>,
    pub api_provider: Arc<dyn BatchApiProvider>,
    pub supervisor: Arc<dyn TaskSupervisorPort>,
    pub event_publisher: Arc<EventPublisher>,
}

/// 应用状态
pub struct AppState {
    // ========== Ports ==========
    pub job_store: Arc<dyn JobStorePort>,
    pub supervisor: Arc<dyn TaskSupervisorPort>,
    pub event_publisher: Arc<EventPublisher>,

    // ========== Command Handlers ==========
    pub create_project_handler: CreateProjectHandler,
    pub set_api_key_handler: SetProjectApiKeyHandler,
    pub delete_project_handler: DeleteProjectHandler,
    pub import_file_handler: ImportBatchFileHandler,
    pub delete_file_handler: DeleteBatchFileHandler,
    pub run_job_handler: RunBatchJobHandler,
    pub retry_job_handler: RetryBatchJobHandler,
    pub cancel_job_handler: CancelBatchJobHandler,
    pub download_results_handler: DownloadBatchResultsHandler,

    // ========== Query Handlers ==========
    pub get_job_handler: GetBatchJobHandler,
    pub list_files_handler: ListProjectFilesHandler,
}

impl AppState {
    /// 创建应用状态
    pub fn new(ports: AppPorts, runner_config: JobRunnerConfig, default_model: impl Into<String>) -> Self {
        let executor = Arc::new(JobRunner::new(
            runner_config,
            ports.job_store.clone(),
            ports.file_repo.clone(),
            ports.storage.clone(),
            ports.event_publisher.clone(),
        ));

        let context = JobCommandContext {
            project_repo: ports.project_repo.clone(),
            file_repo: ports.file_repo.clone(),
            job_store: ports.job_store.clone(),
            credentials: ports.credentials.clone(),
            api_provider: ports.api_provider.clone(),
            supervisor: ports.supervisor.clone(),
            executor,
        };

        Self {
            // Ports
            job_store: ports.job_store.clone(),
            supervisor: ports.supervisor.clone(),
            event_publisher: ports.event_publisher.clone(),

            // Command handlers
            create_project_handler: CreateProjectHandler::new(
                ports.project_repo.clone(),
                default_model,
            ),
            set_api_key_handler: SetProjectApiKeyHandler::new(
                ports.project_repo.clone(),
                ports.credentials.clone(),
            ),
            delete_project_handler: DeleteProjectHandler::new(
                ports.project_repo.clone(),
                ports.file_repo.clone(),
                ports.job_store.clone(),
                ports.storage.clone(),
                ports.credentials.clone(),
                ports.supervisor.clone(),
            ),
            import_file_handler: ImportBatchFileHandler::new(
                ports.project_repo.clone(),
                ports.file_repo.clone(),
                ports.storage.clone(),
            ),
            delete_file_handler: DeleteBatchFileHandler::new(
                ports.file_repo.clone(),
                ports.job_store.clone(),
                ports.storage.clone(),
                ports.supervisor.clone(),
            ),
            run_job_handler: RunBatchJobHandler::new(context.clone()),
            retry_job_handler: RetryBatchJobHandler::new(context.clone()),
            cancel_job_handler: CancelBatchJobHandler::new(context.clone()),
            download_results_handler: DownloadBatchResultsHandler::new(context),

            // Query handlers
            get_job_handler: GetBatchJobHandler::new(ports.file_repo.clone(), ports.job_store.clone()),
            list_files_handler: ListProjectFilesHandler::new(
                ports.project_repo,
                ports.file_repo,
                ports.job_store,
            ),
        }
    }

    /// 恢复远端仍在进行中的任务，返回恢复数量
    ///
    /// 单个任务恢复失败时把原因追加到该任务的消息中，然后继续恢复其余任务
    pub async fn resume_active_jobs(&self) -> Result<usize, ApplicationError> {
        let active = self.job_store.find_active().await?;

        let mut resumed = 0;
        for job in active {
            match self
                .run_job_handler
                .handle(RunBatchJob { file_id: job.file_id })
                .await
            {
                Ok(_) => resumed += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, file_id = %job.file_id, error = %e, "Failed to resume batch job");
                    let text = format!("Resume failed: {}", e);
                    self.job_store
                        .update(
                            job.id,
                            job_mutator(move |job| {
                                job.push_message(text, MessageSeverity::Error, Utc::now());
                                Ok(())
                            }),
                        )
                        .await?;
                }
            }
        }
        Ok(resumed)
    }

    /// 停止所有 Runner
    pub fn shutdown(&self) -> usize {
        self.supervisor.cancel_all()
    }
}
