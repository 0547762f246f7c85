//! Batch Job Command Handlers
//!
//! Runner 通过 TaskSupervisor 启动，保证同一任务同时只有一个执行者；
//! 取消命令是唯一写入 `cancelled` 的地方。

use chrono::Utc;
use futures_util::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::commands::{
    CancelBatchJob, DownloadBatchResults, RetryBatchJob, RunBatchJob,
};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    job_mutator, BatchApiProvider, CredentialStorePort, FileRepositoryPort, JobExecutorPort,
    JobStorePort, ProjectRepositoryPort, RepositoryError, RunRequest, TaskSupervisorPort,
};
use crate::domain::batch::{BatchInputFile, BatchJob, BatchJobStatus, JobEvent, MessageSeverity};

/// 任务命令共用的依赖
#[derive(Clone)]
pub struct JobCommandContext {
    pub project_repo: Arc<dyn ProjectRepositoryPort>,
    pub file_repo: Arc<dyn FileRepositoryPort>,
    pub job_store: Arc<dyn JobStorePort>,
    pub credentials: Arc<dyn CredentialStorePort>,
    pub api_provider: Arc<dyn BatchApiProvider>,
    pub supervisor: Arc<dyn TaskSupervisorPort>,
    pub executor: Arc<dyn JobExecutorPort>,
}

impl JobCommandContext {
    async fn load_file(&self, file_id: Uuid) -> Result<BatchInputFile, ApplicationError> {
        self.file_repo
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("BatchInputFile", file_id))
    }

    async fn load_job(&self, file_id: Uuid) -> Result<BatchJob, ApplicationError> {
        self.job_store
            .find_by_file(file_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("BatchJob", file_id))
    }

    /// 用项目的 API Key 与模型构建运行请求
    async fn run_request(&self, file: &BatchInputFile, job_id: Uuid) -> Result<RunRequest, ApplicationError> {
        let project = self
            .project_repo
            .find_by_id(file.project_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Project", file.project_id))?;
        let api_key = self.credentials.require_api_key(project.id)?;
        let api = self.api_provider.client(&api_key)?;

        Ok(RunRequest {
            job_id,
            api,
            model: project.model,
        })
    }

    /// 丢弃文件的旧任务并插入新任务
    async fn reset_job(&self, file: &BatchInputFile, previous: Option<&BatchJob>) -> Result<BatchJob, ApplicationError> {
        if let Some(previous) = previous {
            self.supervisor.cancel(previous.id);
        }
        let fresh = BatchJob::new(file.id);
        self.job_store.replace_for_file(&fresh).await?;

        tracing::info!(
            file_id = %file.id,
            job_id = %fresh.id,
            previous_job_id = ?previous.map(|job| job.id),
            previous_status = ?previous.map(|job| job.status),
            "Batch job reset"
        );
        Ok(fresh)
    }

    fn spawn_runner(&self, request: RunRequest) {
        let job_id = request.job_id;
        let executor = Arc::clone(&self.executor);
        self.supervisor.start(
            job_id,
            Box::new(move |token: CancellationToken| {
                async move {
                    // Runner 自己记录并发布失败，这里只留痕
                    if let Err(e) = executor.run(request, token).await {
                        tracing::debug!(job_id = %job_id, error = %e, "Supervised runner exited with error");
                    }
                }
                .boxed()
            }),
        );
    }
}

/// 运行/重试命令的响应
#[derive(Debug, Clone)]
pub struct RunBatchJobResponse {
    pub job_id: Uuid,
    /// 启动 Runner 时记录中的状态
    pub status: BatchJobStatus,
}

// ============================================================================
// RunBatchJob
// ============================================================================

/// RunBatchJob Handler
///
/// 任务不存在时创建；`failed|cancelled|expired|unspecified` 自动重置后再运行
pub struct RunBatchJobHandler {
    context: JobCommandContext,
}

impl RunBatchJobHandler {
    pub fn new(context: JobCommandContext) -> Self {
        Self { context }
    }

    pub async fn handle(&self, command: RunBatchJob) -> Result<RunBatchJobResponse, ApplicationError> {
        let file = self.context.load_file(command.file_id).await?;
        // 凭据缺失时不创建任务
        let template = self.context.run_request(&file, Uuid::nil()).await?;

        let job = match self.context.job_store.find_by_file(file.id).await? {
            Some(job) if job.status.requires_reset() => {
                self.context.reset_job(&file, Some(&job)).await?
            }
            Some(job) => job,
            None => {
                let job = BatchJob::new(file.id);
                self.context.job_store.insert(&job).await?;
                tracing::info!(file_id = %file.id, job_id = %job.id, "Batch job created");
                job
            }
        };

        self.context.spawn_runner(RunRequest {
            job_id: job.id,
            ..template
        });

        tracing::info!(job_id = %job.id, status = %job.status, "Batch job run requested");
        Ok(RunBatchJobResponse {
            job_id: job.id,
            status: job.status,
        })
    }
}

// ============================================================================
// RetryBatchJob
// ============================================================================

/// RetryBatchJob Handler - 无论当前状态，丢弃旧任务后重新运行
pub struct RetryBatchJobHandler {
    context: JobCommandContext,
}

impl RetryBatchJobHandler {
    pub fn new(context: JobCommandContext) -> Self {
        Self { context }
    }

    pub async fn handle(&self, command: RetryBatchJob) -> Result<RunBatchJobResponse, ApplicationError> {
        let file = self.context.load_file(command.file_id).await?;
        let previous = self.context.job_store.find_by_file(file.id).await?;

        // 先确认凭据可用，再丢弃旧任务
        let template = self.context.run_request(&file, Uuid::nil()).await?;
        let job = self.context.reset_job(&file, previous.as_ref()).await?;
        self.context.spawn_runner(RunRequest {
            job_id: job.id,
            ..template
        });

        Ok(RunBatchJobResponse {
            job_id: job.id,
            status: job.status,
        })
    }
}

// ============================================================================
// CancelBatchJob
// ============================================================================

/// CancelBatchJob Handler
///
/// 停止 Runner 并本地记为 `cancelled`；远端任务仍在进行时再尽力取消
pub struct CancelBatchJobHandler {
    context: JobCommandContext,
}

impl CancelBatchJobHandler {
    pub fn new(context: JobCommandContext) -> Self {
        Self { context }
    }

    pub async fn handle(&self, command: CancelBatchJob) -> Result<BatchJob, ApplicationError> {
        let file = self.context.load_file(command.file_id).await?;
        let job = self.context.load_job(file.id).await?;

        let stopped = self.context.supervisor.cancel(job.id);
        if !job.status.can_cancel() {
            tracing::debug!(job_id = %job.id, status = %job.status, "Cancel ignored for settled job");
            return Ok(job);
        }

        let updated = self
            .context
            .job_store
            .update(
                job.id,
                job_mutator(|job| {
                    let now = Utc::now();
                    job.apply(JobEvent::CancelRequested, now)?;
                    job.push_message("Batch job cancelled", MessageSeverity::Error, now);
                    Ok(())
                }),
            )
            .await;

        let cancelled = match updated {
            Ok(job) => job,
            // Runner 在取消前已把任务推进到终态
            Err(RepositoryError::Rejected(e)) => {
                tracing::debug!(job_id = %job.id, error = %e, "Cancel raced with completion");
                return Ok(self.context.load_job(file.id).await?);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(job_id = %cancelled.id, runner_stopped = stopped, "Batch job cancelled");

        // 可取消的记录只有在 pending|running 时才带远端名称；
        // 以实际被取消的记录为准，Runner 可能在读取之后才写入远端任务
        let Some(remote_name) = cancelled.remote_name.clone() else {
            return Ok(cancelled);
        };
        let outcome = match self.context.run_request(&file, cancelled.id).await {
            Ok(request) => request
                .api
                .cancel_batch_job(&remote_name)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(()) => Ok(cancelled),
            Err(e) => {
                tracing::warn!(job_id = %cancelled.id, remote = %remote_name, error = %e, "Remote cancel failed");
                let text = format!("Remote cancel failed: {}", e);
                Ok(self
                    .context
                    .job_store
                    .update(
                        cancelled.id,
                        job_mutator(move |job| {
                            job.push_message(text, MessageSeverity::Error, Utc::now());
                            Ok(())
                        }),
                    )
                    .await?)
            }
        }
    }
}

// ============================================================================
// DownloadBatchResults
// ============================================================================

/// 下载结果响应
#[derive(Debug, Clone)]
pub struct DownloadBatchResultsResponse {
    pub job_id: Uuid,
    pub path: PathBuf,
}

/// DownloadBatchResults Handler - Runner 运行期间拒绝下载
pub struct DownloadBatchResultsHandler {
    context: JobCommandContext,
}

impl DownloadBatchResultsHandler {
    pub fn new(context: JobCommandContext) -> Self {
        Self { context }
    }

    pub async fn handle(
        &self,
        command: DownloadBatchResults,
    ) -> Result<DownloadBatchResultsResponse, ApplicationError> {
        let file = self.context.load_file(command.file_id).await?;
        let job = self.context.load_job(file.id).await?;

        if self.context.supervisor.is_running(job.id) {
            return Err(ApplicationError::invalid_state(format!(
                "Batch job {} is still running",
                job.id
            )));
        }

        let request = self.context.run_request(&file, job.id).await?;
        let path = self.context.executor.download_results(request).await?;
        Ok(DownloadBatchResultsResponse {
            job_id: job.id,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::error::BatchJobError;
    use crate::application::ports::{FileStoragePort, JobMutator, SupervisedTask};
    use crate::domain::project::{Project, ProjectName};
    use crate::infrastructure::adapters::{
        FakeBatchClient, FakeBatchProvider, FakeBatchScript, LocalFileStorage,
    };
    use crate::infrastructure::events::EventPublisher;
    use crate::infrastructure::memory::{InMemoryCredentialStore, InMemoryTaskSupervisor};
    use crate::infrastructure::persistence::sqlite::{
        test_pool, SqliteFileRepository, SqliteJobStore, SqliteProjectRepository,
    };
    use crate::infrastructure::worker::{JobRunner, JobRunnerConfig};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        context: JobCommandContext,
        jobs: Arc<SqliteJobStore>,
        supervisor: Arc<InMemoryTaskSupervisor>,
        api: Arc<FakeBatchClient>,
        file: BatchInputFile,
        _dir: TempDir,
    }

    fn runner_config() -> JobRunnerConfig {
        JobRunnerConfig {
            file_poll_interval: Duration::from_millis(5),
            file_poll_timeout: Duration::from_secs(2),
            poll_initial_interval: Duration::from_millis(5),
            poll_max_interval: Duration::from_millis(10),
            backoff_multiplier: 1.5,
            max_polls: None,
        }
    }

    async fn fixture(script: FakeBatchScript) -> Fixture {
        let dir = tempdir().unwrap();
        let pool = test_pool().await;
        let projects = Arc::new(SqliteProjectRepository::new(pool.clone()));
        let files = Arc::new(SqliteFileRepository::new(pool.clone()));
        let jobs = Arc::new(SqliteJobStore::new(pool));
        let storage = Arc::new(LocalFileStorage::new(dir.path().join("projects")).await.unwrap());
        let credentials = InMemoryCredentialStore::default().arc();
        let supervisor = InMemoryTaskSupervisor::new().arc();
        let api = FakeBatchClient::new(script).arc();

        let project = Project::new(ProjectName::new("Jobs").unwrap(), "gemini-2.5-flash").unwrap();
        projects.save(&project).await.unwrap();
        credentials.set_api_key(project.id, "secret".to_string()).unwrap();

        let source = dir.path().join("requests.jsonl");
        std::fs::write(&source, b"{\"key\":\"1\"}\n").unwrap();
        let stored = storage.import_file(project.id, &source).await.unwrap();
        let file = BatchInputFile::new(project.id, stored.display_name, stored.path, stored.size_bytes);
        files.save(&file).await.unwrap();

        let executor = Arc::new(JobRunner::new(
            runner_config(),
            jobs.clone(),
            files.clone(),
            storage,
            EventPublisher::new().arc(),
        ));
        let context = JobCommandContext {
            project_repo: projects,
            file_repo: files,
            job_store: jobs.clone(),
            credentials,
            api_provider: Arc::new(FakeBatchProvider::new(api.clone())),
            supervisor: supervisor.clone(),
            executor,
        };

        Fixture {
            context,
            jobs,
            supervisor,
            api,
            file,
            _dir: dir,
        }
    }

    impl Fixture {
        async fn job(&self) -> BatchJob {
            self.jobs.find_by_file(self.file.id).await.unwrap().unwrap()
        }

        async fn wait_for_status(&self, status: BatchJobStatus) -> BatchJob {
            for _ in 0..400 {
                let job = self.job().await;
                if job.status == status {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("status {} not reached", status);
        }

        async fn wait_for_idle(&self, job_id: Uuid) {
            for _ in 0..400 {
                if !self.supervisor.is_running(job_id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("runner still active");
        }
    }

    fn states(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_creates_job_and_reaches_success() {
        let f = fixture(FakeBatchScript {
            job_states: states(&["BATCH_STATE_SUCCEEDED"]),
            ..Default::default()
        })
        .await;

        let response = RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        assert_eq!(response.status, BatchJobStatus::NotStarted);

        let job = f.wait_for_status(BatchJobStatus::Succeeded).await;
        assert_eq!(job.id, response.job_id);
        f.wait_for_idle(job.id).await;
    }

    #[tokio::test]
    async fn test_run_without_api_key_fails_before_creating_job() {
        let f = fixture(FakeBatchScript::default()).await;
        let project_id = f.file.project_id;
        f.context.credentials.delete_api_key(project_id).unwrap();

        let err = RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::CredentialError(_)));
        assert_eq!(f.api.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_job_cancels_remote() {
        let f = fixture(FakeBatchScript {
            job_states: states(&["BATCH_STATE_PENDING"]),
            ..Default::default()
        })
        .await;
        let response = RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        f.wait_for_status(BatchJobStatus::Pending).await;
        assert!(f.supervisor.is_running(response.job_id));

        let job = CancelBatchJobHandler::new(f.context.clone())
            .handle(CancelBatchJob { file_id: f.file.id })
            .await
            .unwrap();

        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert_eq!(f.api.cancel_calls(), 1);
        assert!(!f.supervisor.is_running(job.id));
        assert!(!f.supervisor.running_jobs().contains(&job.id));

        // 被取消的 Runner 不会再改写记录
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(f.job().await.status, BatchJobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_remote_cancel_failure_still_cancels_locally() {
        let f = fixture(FakeBatchScript {
            cancel_failure: Some(500),
            ..Default::default()
        })
        .await;
        let job = BatchJob::new(f.file.id);
        f.jobs.insert(&job).await.unwrap();
        f.jobs
            .update(
                job.id,
                job_mutator(|job| {
                    let now = Utc::now();
                    job.apply(JobEvent::UploadStarted, now)?;
                    job.apply(JobEvent::FileUploaded, now)?;
                    job.apply(
                        JobEvent::JobCreated {
                            remote_name: "batches/remote".to_string(),
                            status: BatchJobStatus::Running,
                            started_at: now,
                        },
                        now,
                    )?;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let job = CancelBatchJobHandler::new(f.context.clone())
            .handle(CancelBatchJob { file_id: f.file.id })
            .await
            .unwrap();

        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert!(job
            .messages
            .iter()
            .any(|m| m.severity == MessageSeverity::Error && m.text.starts_with("Remote cancel failed")));
    }

    /// 第一次 update 之前先替 Runner 写入远端任务
    struct RacingJobStore {
        inner: Arc<SqliteJobStore>,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl JobStorePort for RacingJobStore {
        async fn insert(&self, job: &BatchJob) -> Result<(), RepositoryError> {
            self.inner.insert(job).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<BatchJob>, RepositoryError> {
            self.inner.get(id).await
        }

        async fn find_by_file(&self, file_id: Uuid) -> Result<Option<BatchJob>, RepositoryError> {
            self.inner.find_by_file(file_id).await
        }

        async fn update(&self, id: Uuid, mutator: JobMutator) -> Result<BatchJob, RepositoryError> {
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner
                    .update(
                        id,
                        job_mutator(|job| {
                            let now = Utc::now();
                            job.apply(
                                JobEvent::JobCreated {
                                    remote_name: "batches/raced".to_string(),
                                    status: BatchJobStatus::Pending,
                                    started_at: now,
                                },
                                now,
                            )?;
                            Ok(())
                        }),
                    )
                    .await?;
            }
            self.inner.update(id, mutator).await
        }

        async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
            self.inner.delete(id).await
        }

        async fn replace_for_file(&self, fresh: &BatchJob) -> Result<(), RepositoryError> {
            self.inner.replace_for_file(fresh).await
        }

        async fn find_active(&self) -> Result<Vec<BatchJob>, RepositoryError> {
            self.inner.find_active().await
        }
    }

    #[tokio::test]
    async fn test_cancel_uses_remote_job_committed_after_read() {
        let f = fixture(FakeBatchScript::default()).await;
        let job = BatchJob::new(f.file.id);
        f.jobs.insert(&job).await.unwrap();
        f.jobs
            .update(
                job.id,
                job_mutator(|job| {
                    let now = Utc::now();
                    job.apply(JobEvent::UploadStarted, now)?;
                    job.apply(JobEvent::FileUploaded, now)?;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let context = JobCommandContext {
            job_store: Arc::new(RacingJobStore {
                inner: f.jobs.clone(),
                raced: std::sync::atomic::AtomicBool::new(false),
            }),
            ..f.context.clone()
        };
        let job = CancelBatchJobHandler::new(context)
            .handle(CancelBatchJob { file_id: f.file.id })
            .await
            .unwrap();

        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert_eq!(job.remote_name.as_deref(), Some("batches/raced"));
        assert_eq!(f.api.cancelled_jobs(), vec!["batches/raced".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_during_create_cancels_created_remote_job() {
        let f = fixture(FakeBatchScript {
            create_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        })
        .await;
        let response = RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        for _ in 0..400 {
            if f.api.create_calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.api.create_calls(), 1);

        let job = CancelBatchJobHandler::new(f.context.clone())
            .handle(CancelBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert!(job.remote_name.is_none());

        f.wait_for_idle(response.job_id).await;
        for _ in 0..400 {
            if !f.api.cancelled_jobs().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.api.cancelled_jobs(), vec!["batches/fake-1".to_string()]);
        let job = f.job().await;
        assert_eq!(job.status, BatchJobStatus::Cancelled);
        assert!(job.remote_name.is_none());
    }

    #[tokio::test]
    async fn test_cancel_settled_job_is_noop() {
        let f = fixture(FakeBatchScript {
            create_state: "BATCH_STATE_FAILED".to_string(),
            ..Default::default()
        })
        .await;
        RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        let failed = f.wait_for_status(BatchJobStatus::Failed).await;

        let job = CancelBatchJobHandler::new(f.context.clone())
            .handle(CancelBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        assert_eq!(job.status, BatchJobStatus::Failed);
        assert_eq!(job.messages.len(), failed.messages.len());
        assert_eq!(f.api.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_discards_previous_job() {
        let f = fixture(FakeBatchScript {
            job_states: states(&["BATCH_STATE_PENDING"]),
            ..Default::default()
        })
        .await;
        let first = RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        f.wait_for_status(BatchJobStatus::Pending).await;

        let retried = RetryBatchJobHandler::new(f.context.clone())
            .handle(RetryBatchJob { file_id: f.file.id })
            .await
            .unwrap();

        assert_ne!(retried.job_id, first.job_id);
        assert_eq!(retried.status, BatchJobStatus::NotStarted);
        assert!(f.jobs.get(first.job_id).await.unwrap().is_none());
        assert!(!f.supervisor.running_jobs().contains(&first.job_id));
        assert_eq!(f.job().await.id, retried.job_id);

        f.supervisor.cancel(retried.job_id);
    }

    #[tokio::test]
    async fn test_run_resets_failed_job() {
        let f = fixture(FakeBatchScript {
            job_states: states(&["BATCH_STATE_FAILED"]),
            ..Default::default()
        })
        .await;
        let handler = RunBatchJobHandler::new(f.context.clone());
        let first = handler.handle(RunBatchJob { file_id: f.file.id }).await.unwrap();
        f.wait_for_status(BatchJobStatus::Failed).await;
        f.wait_for_idle(first.job_id).await;

        let second = handler.handle(RunBatchJob { file_id: f.file.id }).await.unwrap();
        assert_ne!(second.job_id, first.job_id);
        assert_eq!(second.status, BatchJobStatus::NotStarted);
        f.wait_for_idle(second.job_id).await;
    }

    #[tokio::test]
    async fn test_download_refused_while_running_then_succeeds() {
        let f = fixture(FakeBatchScript {
            job_states: states(&["BATCH_STATE_SUCCEEDED"]),
            results: b"{\"key\":\"1\",\"response\":{}}\n".to_vec(),
            ..Default::default()
        })
        .await;
        let job = BatchJob::new(f.file.id);
        f.jobs.insert(&job).await.unwrap();
        let blocker: SupervisedTask =
            Box::new(|token: CancellationToken| async move { token.cancelled().await }.boxed());
        f.supervisor.start(job.id, blocker);

        let handler = DownloadBatchResultsHandler::new(f.context.clone());
        let err = handler
            .handle(DownloadBatchResults { file_id: f.file.id })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidState(_)));
        f.supervisor.cancel(job.id);

        let err = handler
            .handle(DownloadBatchResults { file_id: f.file.id })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::BatchJob(BatchJobError::BatchJobNotCompleted(BatchJobStatus::NotStarted))
        ));

        RunBatchJobHandler::new(f.context.clone())
            .handle(RunBatchJob { file_id: f.file.id })
            .await
            .unwrap();
        f.wait_for_status(BatchJobStatus::Succeeded).await;
        f.wait_for_idle(job.id).await;

        let response = handler
            .handle(DownloadBatchResults { file_id: f.file.id })
            .await
            .unwrap();
        assert!(response.path.exists());
        assert_eq!(f.job().await.status, BatchJobStatus::JobFileDownloaded);
    }

    #[tokio::test]
    async fn test_expired_success_is_reported_on_download() {
        let f = fixture(FakeBatchScript::default()).await;
        let job = BatchJob::new(f.file.id);
        f.jobs.insert(&job).await.unwrap();
        f.jobs
            .update(
                job.id,
                job_mutator(|job| {
                    let now = Utc::now();
                    job.apply(JobEvent::UploadStarted, now)?;
                    job.apply(JobEvent::FileUploaded, now)?;
                    job.apply(
                        JobEvent::JobCreated {
                            remote_name: "batches/old".to_string(),
                            status: BatchJobStatus::Succeeded,
                            started_at: now - ChronoDuration::hours(49),
                        },
                        now,
                    )?;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let err = DownloadBatchResultsHandler::new(f.context.clone())
            .handle(DownloadBatchResults { file_id: f.file.id })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::BatchJob(BatchJobError::BatchJobNotCompleted(BatchJobStatus::Expired))
        ));
        assert_eq!(f.job().await.status, BatchJobStatus::Expired);
        assert_eq!(f.api.download_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let f = fixture(FakeBatchScript::default()).await;
        let err = CancelBatchJobHandler::new(f.context.clone())
            .handle(CancelBatchJob {
                file_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound { .. }));
    }
}
