//! Job Executor Port - 驱动单个批处理任务
//!
//! 具体实现（JobRunner）在 infrastructure/worker 层

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::BatchApiPort;
use crate::application::error::BatchJobError;
use crate::domain::batch::BatchJobStatus;

/// 一次运行所需的上下文
#[derive(Clone)]
pub struct RunRequest {
    pub job_id: Uuid,
    /// 按项目 API Key 构建的客户端
    pub api: Arc<dyn BatchApiPort>,
    /// 项目选择的模型
    pub model: String,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("job_id", &self.job_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// 运行结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 到达稳定状态（终态或 unspecified）
    Completed(BatchJobStatus),
    /// 观察到取消信号
    Cancelled,
    /// 达到配置的轮询次数上限，任务仍在远端进行
    PollLimitReached(BatchJobStatus),
}

/// Job Executor Port
#[async_trait]
pub trait JobExecutorPort: Send + Sync {
    /// 上传 → 创建 → 轮询，直到稳定状态或取消
    async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, BatchJobError>;

    /// 下载已成功任务的结果，返回结果文件路径
    async fn download_results(&self, request: RunRequest) -> Result<PathBuf, BatchJobError>;
}
