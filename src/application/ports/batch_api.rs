//! Batch API Port - 远端批处理推理 API 抽象
//!
//! 定义远端 API 的抽象接口，具体实现在 infrastructure/adapters 层。
//! 客户端内部不做重试，重试策略由 JobRunner 决定。

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// 远端 API 错误
#[derive(Debug, Error, Clone)]
pub enum BatchApiError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Missing field in response: {0}")]
    MissingField(&'static str),
}

impl BatchApiError {
    /// 网络抖动、超时、5xx、429 视为暂时性错误
    pub fn is_transient(&self) -> bool {
        match self {
            BatchApiError::Transport(_) | BatchApiError::Timeout => true,
            BatchApiError::Http { status, .. } => *status == 429 || *status >= 500,
            BatchApiError::Decode(_) | BatchApiError::MissingField(_) => false,
        }
    }
}

/// 远端文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// 例如 `files/abc123`
    pub name: String,
    pub uri: String,
    /// 原始状态字符串，由领域层映射
    pub state: Option<String>,
    pub create_time: Option<String>,
    pub expiration_time: Option<String>,
}

/// 远端批处理任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    /// 例如 `batches/xyz789`
    pub name: String,
    pub state: Option<String>,
    pub create_time: Option<String>,
}

/// Batch API Port
///
/// 所有操作都是单次调用，失败即返回
#[async_trait]
pub trait BatchApiPort: Send + Sync {
    /// 上传输入文件
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, BatchApiError>;

    /// 查询远端文件状态
    async fn get_file(&self, name: &str) -> Result<RemoteFile, BatchApiError>;

    /// 创建批处理任务
    async fn create_batch_job(
        &self,
        file_name: &str,
        display_name: &str,
        model: &str,
    ) -> Result<RemoteJob, BatchApiError>;

    /// 查询任务状态（单次）
    async fn get_batch_job(&self, name: &str) -> Result<RemoteJob, BatchApiError>;

    /// 请求远端取消
    async fn cancel_batch_job(&self, name: &str) -> Result<(), BatchApiError>;

    /// 下载结果文件
    async fn download_results(&self, job_name: &str) -> Result<Vec<u8>, BatchApiError>;
}

/// 按项目的 API Key 构建客户端
pub trait BatchApiProvider: Send + Sync {
    fn client(&self, api_key: &str) -> Result<Arc<dyn BatchApiPort>, BatchApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BatchApiError::Timeout.is_transient());
        assert!(BatchApiError::Transport("reset".into()).is_transient());
        assert!(BatchApiError::Http { status: 503, message: String::new() }.is_transient());
        assert!(BatchApiError::Http { status: 429, message: String::new() }.is_transient());
        assert!(!BatchApiError::Http { status: 400, message: String::new() }.is_transient());
        assert!(!BatchApiError::Decode("bad".into()).is_transient());
    }
}
