//! Job Runner - 驱动单个批处理任务走完状态机
//!
//! 每一步之前重新读取持久化状态，由 `next_step` 决定动作；
//! 取消信号在步骤之间和等待期间检查。

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::error::BatchJobError;
use crate::application::ports::{
    job_mutator, BatchApiPort, FileRepositoryPort, FileStoragePort, JobExecutorPort,
    JobStorePort, RemoteFile, RepositoryError, RunOutcome, RunRequest,
};
use crate::domain::batch::state_machine::{created_or_now, expiration_or_default};
use crate::domain::batch::{
    effective_status, next_step, transition, BatchDomainError, BatchInputFile, BatchJob,
    BatchJobStatus, JobEvent, MessageSeverity, RemoteFileStatus, RunStep, TokenUsage,
};
use crate::infrastructure::events::EventPublisher;

const INPUT_MIME_TYPE: &str = "application/jsonl";

/// Runner 配置
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// 远端文件处理中时的查询间隔
    pub file_poll_interval: Duration,
    /// 等待远端文件处理完成的上限
    pub file_poll_timeout: Duration,
    /// 任务轮询的初始间隔
    pub poll_initial_interval: Duration,
    /// 退避后的最大间隔
    pub poll_max_interval: Duration,
    pub backoff_multiplier: f64,
    /// 单次运行的最大轮询次数，`None` 表示直到终态
    pub max_polls: Option<u32>,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            file_poll_interval: Duration::from_secs(5),
            file_poll_timeout: Duration::from_secs(600),
            poll_initial_interval: Duration::from_secs(30),
            poll_max_interval: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            max_polls: None,
        }
    }
}

impl JobRunnerConfig {
    fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.poll_max_interval)
    }
}

/// 状态对应的消息级别
fn severity_for(status: BatchJobStatus) -> MessageSeverity {
    match status {
        BatchJobStatus::Succeeded | BatchJobStatus::JobFileDownloaded => MessageSeverity::Success,
        BatchJobStatus::Failed
        | BatchJobStatus::Cancelled
        | BatchJobStatus::Expired
        | BatchJobStatus::Unspecified => MessageSeverity::Error,
        _ => MessageSeverity::Pending,
    }
}

/// 等待指定时间；期间被取消时返回 `false`
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// 批处理任务 Runner
///
/// 同一任务同时只应有一个 Runner（由 TaskSupervisor 保证）
pub struct JobRunner {
    config: JobRunnerConfig,
    jobs: Arc<dyn JobStorePort>,
    files: Arc<dyn FileRepositoryPort>,
    storage: Arc<dyn FileStoragePort>,
    event_publisher: Arc<EventPublisher>,
}

impl JobRunner {
    pub fn new(
        config: JobRunnerConfig,
        jobs: Arc<dyn JobStorePort>,
        files: Arc<dyn FileRepositoryPort>,
        storage: Arc<dyn FileStoragePort>,
        event_publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            config,
            jobs,
            files,
            storage,
            event_publisher,
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<BatchJob, BatchJobError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(BatchJobError::JobNotFound(job_id))
    }

    async fn load_file(&self, file_id: Uuid) -> Result<BatchInputFile, BatchJobError> {
        self.files
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| BatchJobError::FileNotStored(format!("input file {} not found", file_id)))
    }

    /// 原子提交一次修改并发布差异事件
    async fn commit<F>(&self, before: &BatchJob, mutate: F) -> Result<BatchJob, BatchJobError>
    where
        F: FnOnce(&mut BatchJob) -> Result<(), BatchDomainError> + Send + 'static,
    {
        let after = self.jobs.update(before.id, job_mutator(mutate)).await?;
        if before.status != after.status {
            tracing::info!(
                job_id = %after.id,
                from = %before.status,
                to = %after.status,
                "Batch job status changed"
            );
        }
        self.event_publisher.publish_job_update(before, &after);
        Ok(after)
    }

    /// 追加 `error` 消息，状态保持不变
    async fn record_failure(&self, job: &BatchJob, text: String) -> Result<BatchJob, BatchJobError> {
        tracing::warn!(job_id = %job.id, status = %job.status, error = %text, "Batch job step failed");
        self.commit(job, move |job| {
            job.push_message(text, MessageSeverity::Error, Utc::now());
            Ok(())
        })
        .await
    }

    async fn record_remote_file(
        &self,
        file: &mut BatchInputFile,
        remote: &RemoteFile,
        status: RemoteFileStatus,
    ) -> Result<(), BatchJobError> {
        let created_at = created_or_now(remote.create_time.as_deref(), Utc::now());
        let expires_at = expiration_or_default(remote.expiration_time.as_deref(), created_at);
        file.record_upload(
            remote.name.clone(),
            remote.uri.clone(),
            status,
            created_at,
            expires_at,
        );
        self.files.update(file).await?;
        Ok(())
    }

    /// 上传输入文件并等待远端处理完成
    async fn upload(
        &self,
        api: &dyn BatchApiPort,
        job: &BatchJob,
        mut file: BatchInputFile,
        cancel: &CancellationToken,
    ) -> Result<(), BatchJobError> {
        let text = format!("Uploading {}", file.display_name);
        let job = self
            .commit(job, move |job| {
                let now = Utc::now();
                job.apply(JobEvent::UploadStarted, now)?;
                job.push_message(text, MessageSeverity::Pending, now);
                Ok(())
            })
            .await?;

        let bytes = match self.storage.read_file(&file.local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_failure(&job, format!("Input file could not be read: {}", e))
                    .await?;
                return Err(BatchJobError::FileNotStored(e.to_string()));
            }
        };

        let remote = match api
            .upload_file(bytes, INPUT_MIME_TYPE, &file.display_name)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                self.record_failure(&job, format!("File upload failed: {}", e))
                    .await?;
                return Err(BatchJobError::FileCouldNotBeUploaded(e.to_string()));
            }
        };
        let status = RemoteFileStatus::from_remote_state(remote.state.as_deref());
        self.record_remote_file(&mut file, &remote, status).await?;

        self.await_file_ready(api, &job, file, remote, status, cancel)
            .await
    }

    /// 上一次运行留下仍在处理中的远端文件：查询其状态后继续等待
    async fn wait_for_file(
        &self,
        api: &dyn BatchApiPort,
        job: &BatchJob,
        file: BatchInputFile,
        cancel: &CancellationToken,
    ) -> Result<(), BatchJobError> {
        let remote_name = file.remote_name.clone().unwrap_or_default();
        let text = format!("Waiting for remote file {}", remote_name);
        let job = self
            .commit(job, move |job| {
                let now = Utc::now();
                job.apply(JobEvent::UploadStarted, now)?;
                job.push_message(text, MessageSeverity::Pending, now);
                Ok(())
            })
            .await?;

        let remote = match api.get_file(&remote_name).await {
            Ok(remote) => remote,
            Err(e) => {
                self.record_failure(&job, format!("File status check failed: {}", e))
                    .await?;
                return Err(BatchJobError::FileCouldNotBeUploaded(e.to_string()));
            }
        };
        let status = RemoteFileStatus::from_remote_state(remote.state.as_deref());

        self.await_file_ready(api, &job, file, remote, status, cancel)
            .await
    }

    /// 轮询远端文件直到离开 `processing`，成功后记录 `fileUploaded`
    async fn await_file_ready(
        &self,
        api: &dyn BatchApiPort,
        job: &BatchJob,
        mut file: BatchInputFile,
        mut remote: RemoteFile,
        mut status: RemoteFileStatus,
        cancel: &CancellationToken,
    ) -> Result<(), BatchJobError> {
        let deadline = tokio::time::Instant::now() + self.config.file_poll_timeout;
        while status == RemoteFileStatus::Processing {
            if tokio::time::Instant::now() >= deadline {
                let text = format!(
                    "Remote file {} still processing after {:?}",
                    remote.name, self.config.file_poll_timeout
                );
                self.record_failure(job, text.clone()).await?;
                return Err(BatchJobError::FileCouldNotBeUploaded(text));
            }
            if !sleep_or_cancel(self.config.file_poll_interval, cancel).await {
                return Ok(());
            }
            remote = match api.get_file(&remote.name).await {
                Ok(remote) => remote,
                Err(e) => {
                    self.record_failure(job, format!("File status check failed: {}", e))
                        .await?;
                    return Err(BatchJobError::FileCouldNotBeUploaded(e.to_string()));
                }
            };
            status = RemoteFileStatus::from_remote_state(remote.state.as_deref());
            tracing::debug!(file_id = %file.id, remote = %remote.name, status = %status.as_str(), "Remote file polled");
        }
        self.record_remote_file(&mut file, &remote, status).await?;

        if status == RemoteFileStatus::Failed {
            let text = format!("Remote processing of {} failed", remote.name);
            self.record_failure(job, text.clone()).await?;
            return Err(BatchJobError::FileCouldNotBeUploaded(text));
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let text = format!("File uploaded as {}", remote.name);
        self.commit(job, move |job| {
            let now = Utc::now();
            job.apply(JobEvent::FileUploaded, now)?;
            job.push_message(text, MessageSeverity::Success, now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// 远端文件仍然有效，跳过上传
    async fn reuse_upload(&self, job: &BatchJob, file: &BatchInputFile) -> Result<(), BatchJobError> {
        let text = format!(
            "Reusing uploaded file {}",
            file.remote_name.as_deref().unwrap_or_default()
        );
        self.commit(job, move |job| {
            let now = Utc::now();
            job.apply(JobEvent::UploadStarted, now)?;
            job.apply(JobEvent::FileUploaded, now)?;
            job.push_message(text, MessageSeverity::Success, now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn create_remote_job(
        &self,
        api: &dyn BatchApiPort,
        model: &str,
        job: &BatchJob,
        file: &BatchInputFile,
        cancel: &CancellationToken,
    ) -> Result<(), BatchJobError> {
        let Some(file_name) = file.remote_name.clone() else {
            let text = "Input file has no remote name".to_string();
            self.record_failure(job, text.clone()).await?;
            return Err(BatchJobError::BatchJobCouldNotBeCreated(text));
        };

        let remote = match api
            .create_batch_job(&file_name, &job.display_name, model)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                self.record_failure(job, format!("Batch job creation failed: {}", e))
                    .await?;
                return Err(BatchJobError::BatchJobCouldNotBeCreated(e.to_string()));
            }
        };

        if cancel.is_cancelled() {
            // 创建期间收到取消：不再记录，撤销刚创建的远端任务
            self.cancel_orphan(api, job.id, &remote.name).await;
            return Ok(());
        }

        let status = BatchJobStatus::from_remote_state(remote.state.as_deref());
        let started_at = created_or_now(remote.create_time.as_deref(), Utc::now());
        let remote_name = remote.name.clone();
        let text = format!("Batch job {} created ({})", remote.name, status);
        let committed = self
            .commit(job, move |job| {
                let now = Utc::now();
                job.apply(
                    JobEvent::JobCreated {
                        remote_name,
                        status,
                        started_at,
                    },
                    now,
                )?;
                job.push_message(text, severity_for(status), now);
                Ok(())
            })
            .await;

        match committed {
            Ok(_) => Ok(()),
            Err(BatchJobError::Repository(
                RepositoryError::Rejected(_) | RepositoryError::NotFound(_),
            )) if cancel.is_cancelled() => {
                // 取消或删除命令先写入了记录：远端任务无处记录
                self.cancel_orphan(api, job.id, &remote.name).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_orphan(&self, api: &dyn BatchApiPort, job_id: Uuid, remote_name: &str) {
        match api.cancel_batch_job(remote_name).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, remote = %remote_name, "Cancelled orphaned remote job");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, remote = %remote_name, error = %e, "Failed to cancel orphaned remote job");
            }
        }
    }

    /// 单次轮询；被取消时返回 `None`
    async fn poll_once(
        &self,
        api: &dyn BatchApiPort,
        job: &BatchJob,
        cancel: &CancellationToken,
    ) -> Result<Option<BatchJobStatus>, BatchJobError> {
        let Some(remote_name) = job.remote_name.as_deref() else {
            let text = "Batch job has no remote name".to_string();
            self.record_failure(job, text.clone()).await?;
            return Err(BatchJobError::BatchJobCouldNotBeFetched(text));
        };

        let remote = match api.get_batch_job(remote_name).await {
            Ok(remote) => remote,
            Err(e) => {
                self.record_failure(job, format!("Status check failed: {}", e))
                    .await?;
                return Err(BatchJobError::BatchJobCouldNotBeFetched(e.to_string()));
            }
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let polled = BatchJobStatus::from_remote_state(remote.state.as_deref());
        let next = transition(job.status, &JobEvent::Polled(polled)).map_err(RepositoryError::from)?;
        tracing::debug!(job_id = %job.id, remote = %remote_name, polled = %polled, "Batch job polled");
        if next == job.status {
            return Ok(Some(next));
        }

        let text = format!("Batch job {}", next);
        let after = self
            .commit(job, move |job| {
                let now = Utc::now();
                if job.apply(JobEvent::Polled(polled), now)? {
                    job.push_message(text, severity_for(job.status), now);
                }
                Ok(())
            })
            .await?;
        Ok(Some(after.status))
    }

    async fn expire(&self, job: &BatchJob) -> Result<(), BatchJobError> {
        self.commit(job, |job| {
            let now = Utc::now();
            if job.apply(JobEvent::ExpirationReached, now)? {
                job.push_message(
                    "Batch job expired: more than 48 hours since it started",
                    MessageSeverity::Error,
                    now,
                );
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn drive(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, BatchJobError> {
        let api = request.api.as_ref();
        let mut polls: u32 = 0;
        let mut interval = self.config.poll_initial_interval;

        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let job = self.load_job(request.job_id).await?;
            let file = self.load_file(job.file_id).await?;
            let step = next_step(&job, &file, Utc::now());
            tracing::debug!(job_id = %job.id, status = %job.status, step = ?step, "Runner step");

            // Ok(Some(_)) 结束运行，Ok(None) 继续下一步
            let result = match step {
                RunStep::Upload => self.upload(api, &job, file, cancel).await.map(|_| None),
                RunStep::ReuseUpload => self.reuse_upload(&job, &file).await.map(|_| None),
                RunStep::WaitForFile => self
                    .wait_for_file(api, &job, file, cancel)
                    .await
                    .map(|_| None),
                RunStep::CreateJob => self
                    .create_remote_job(api, &request.model, &job, &file, cancel)
                    .await
                    .map(|_| None),
                RunStep::Expire => self.expire(&job).await.map(|_| None),
                RunStep::Poll => {
                    let was_succeeded = job.status == BatchJobStatus::Succeeded;
                    match self.poll_once(api, &job, cancel).await {
                        Ok(None) => Ok(Some(RunOutcome::Cancelled)),
                        Ok(Some(status)) => {
                            polls += 1;
                            if was_succeeded
                                || status.is_terminal()
                                || status == BatchJobStatus::Unspecified
                            {
                                Ok(Some(RunOutcome::Completed(status)))
                            } else if self.config.max_polls.map_or(false, |max| polls >= max) {
                                Ok(Some(RunOutcome::PollLimitReached(status)))
                            } else if !sleep_or_cancel(interval, cancel).await {
                                Ok(Some(RunOutcome::Cancelled))
                            } else {
                                interval = self.config.next_interval(interval);
                                Ok(None)
                            }
                        }
                        Err(e) => Err(e),
                    }
                }
                RunStep::Finished(status) => Ok(Some(RunOutcome::Completed(status))),
            };

            match result {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                // 取消命令已改写或删除记录，放弃本次提交
                Err(
                    e @ BatchJobError::Repository(
                        RepositoryError::Rejected(_) | RepositoryError::NotFound(_),
                    ),
                ) if cancel.is_cancelled() => {
                    tracing::debug!(job_id = %request.job_id, error = %e, "Commit dropped after cancellation");
                    return Ok(RunOutcome::Cancelled);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl JobExecutorPort for JobRunner {
    async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, BatchJobError> {
        let job_id = request.job_id;
        tracing::info!(job_id = %job_id, model = %request.model, "Job runner started");

        let result = self.drive(&request, &cancel).await;
        match &result {
            Ok(RunOutcome::Completed(status)) | Ok(RunOutcome::PollLimitReached(status)) => {
                tracing::info!(job_id = %job_id, status = %status, "Job runner finished");
                self.event_publisher.publish_run_finished(job_id, *status);
            }
            Ok(RunOutcome::Cancelled) => {
                tracing::info!(job_id = %job_id, "Job runner cancelled");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job runner failed");
                self.event_publisher.publish_run_failed(job_id, &e.to_string());
            }
        }
        result
    }

    async fn download_results(&self, request: RunRequest) -> Result<PathBuf, BatchJobError> {
        let job = self.load_job(request.job_id).await?;
        let mut file = self.load_file(job.file_id).await?;

        match effective_status(&job, Utc::now()) {
            BatchJobStatus::Succeeded => {}
            BatchJobStatus::JobFileDownloaded => {
                return file.result_path.clone().ok_or_else(|| {
                    BatchJobError::FileNotStored("result file path missing".to_string())
                });
            }
            BatchJobStatus::Expired if job.status != BatchJobStatus::Expired => {
                self.expire(&job).await?;
                return Err(BatchJobError::BatchJobNotCompleted(BatchJobStatus::Expired));
            }
            other => return Err(BatchJobError::BatchJobNotCompleted(other)),
        }

        let Some(remote_name) = job.remote_name.as_deref() else {
            let text = "Batch job has no remote name".to_string();
            self.record_failure(&job, text.clone()).await?;
            return Err(BatchJobError::BatchJobCouldNotBeFetched(text));
        };

        let bytes = match request.api.download_results(remote_name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_failure(&job, format!("Results download failed: {}", e))
                    .await?;
                return Err(BatchJobError::BatchJobCouldNotBeFetched(e.to_string()));
            }
        };

        let result_file_name = file.result_file_name();
        let path = match self
            .storage
            .write_results(file.project_id, &result_file_name, &bytes)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                self.record_failure(&job, format!("Results could not be saved: {}", e))
                    .await?;
                return Err(e.into());
            }
        };

        let usage = TokenUsage::from_results_jsonl(&bytes);
        file.result_path = Some(path.clone());
        self.files.update(&file).await?;

        let name = result_file_name.clone();
        self.commit(&job, move |job| {
            let now = Utc::now();
            job.apply(
                JobEvent::ResultsDownloaded {
                    result_file_name: name.clone(),
                    usage,
                },
                now,
            )?;
            job.push_message(format!("Results saved to {}", name), MessageSeverity::Success, now);
            Ok(())
        })
        .await?;

        tracing::info!(
            job_id = %job.id,
            path = %path.display(),
            total_tokens = ?usage.total,
            "Batch results downloaded"
        );
        self.event_publisher
            .publish_results_downloaded(job.id, &result_file_name);
        Ok(path)
    }
}
