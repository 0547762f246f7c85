//! batchdesk - Batch 任务恢复守护进程
//!
//! 启动后恢复所有未结束的远端任务并持续轮询，Ctrl-C 时停止所有 Runner

use std::sync::Arc;

use batchdesk::config::{load_config, print_config, AppConfig};
use batchdesk::infrastructure::adapters::{
    HttpBatchClientConfig, HttpBatchClientProvider, LocalFileStorage,
};
use batchdesk::infrastructure::events::{EventPublisher, JobNotification};
use batchdesk::infrastructure::memory::{InMemoryCredentialStore, InMemoryTaskSupervisor};
use batchdesk::infrastructure::persistence::sqlite::{
    create_pool, run_migrations, DatabaseConfig, SqliteFileRepository, SqliteJobStore,
    SqliteProjectRepository,
};
use batchdesk::infrastructure::state::{AppPorts, AppState};
use batchdesk::infrastructure::worker::JobRunnerConfig;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    init_tracing(&config);

    tracing::info!("batchdesk - Batch 任务恢复守护进程");
    print_config(&config);

    // 确保数据目录存在
    tokio::fs::create_dir_all(&config.storage.projects_dir).await?;
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // 初始化数据库
    let db_config = DatabaseConfig {
        database_url: config.database.database_url(),
        max_connections: config.database.max_connections,
    };
    let pool = create_pool(&db_config).await?;
    run_migrations(&pool).await?;

    // 远端 API
    let api_config = HttpBatchClientConfig {
        base_url: config.api.base_url.clone(),
        api_version: config.api.api_version.clone(),
        timeout_secs: config.api.timeout_secs,
        upload_timeout_secs: config.api.upload_timeout_secs,
    };
    let api_provider = Arc::new(HttpBatchClientProvider::new(api_config)?);

    let event_publisher = EventPublisher::new().arc();
    let ports = AppPorts {
        project_repo: Arc::new(SqliteProjectRepository::new(pool.clone())),
        file_repo: Arc::new(SqliteFileRepository::new(pool.clone())),
        job_store: Arc::new(SqliteJobStore::new(pool)),
        storage: Arc::new(LocalFileStorage::new(&config.storage.projects_dir).await?),
        credentials: InMemoryCredentialStore::new(config.api.api_key.clone()).arc(),
        api_provider,
        supervisor: InMemoryTaskSupervisor::new().arc(),
        event_publisher: event_publisher.clone(),
    };
    let state = AppState::new(ports, runner_config(&config), config.api.default_model.clone());

    tokio::spawn(log_job_events(event_publisher));

    let resumed = state.resume_active_jobs().await?;
    tracing::info!(resumed, "Active batch jobs resumed");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    let cancelled = state.shutdown();
    tracing::info!(cancelled, "Shutdown complete");

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log.filter_directive()));

    if config.log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn runner_config(config: &AppConfig) -> JobRunnerConfig {
    let runner = &config.runner;
    JobRunnerConfig {
        file_poll_interval: runner.file_poll_interval(),
        file_poll_timeout: runner.file_poll_timeout(),
        poll_initial_interval: runner.poll_interval(),
        poll_max_interval: runner.max_poll_interval(),
        backoff_multiplier: runner.backoff_multiplier,
        max_polls: runner.max_polls(),
    }
}

/// 将全局任务事件写入日志
async fn log_job_events(publisher: Arc<EventPublisher>) {
    let mut events = publisher.subscribe_global();
    loop {
        match events.recv().await {
            Ok(JobNotification::StatusChanged {
                job_id,
                file_id,
                from,
                to,
            }) => {
                tracing::info!(job_id = %job_id, file_id = %file_id, from = %from, to = %to, "Job status changed");
            }
            Ok(JobNotification::MessageAppended {
                job_id,
                text,
                severity,
            }) => {
                tracing::info!(job_id = %job_id, severity = ?severity, "{}", text);
            }
            Ok(JobNotification::RunFinished { job_id, status }) => {
                tracing::info!(job_id = %job_id, status = %status, "Runner finished");
            }
            Ok(JobNotification::RunFailed { job_id, error }) => {
                tracing::warn!(job_id = %job_id, error = %error, "Runner failed");
            }
            Ok(JobNotification::ResultsDownloaded {
                job_id,
                result_file_name,
            }) => {
                tracing::info!(job_id = %job_id, file = %result_file_name, "Results downloaded");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
