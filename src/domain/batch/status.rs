//! Batch Context - Status Value Objects

use serde::{Deserialize, Serialize};

/// 批处理任务状态
///
/// 顺序: NotStarted → Started → FileUploaded → Pending → Running →
/// {Succeeded | Failed | Cancelled | Expired | Unspecified} → JobFileDownloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    /// 尚未运行
    NotStarted,
    /// 已开始（正在上传输入文件）
    Started,
    /// 输入文件已上传
    FileUploaded,
    /// 远端返回了无法识别的状态
    Unspecified,
    /// 远端排队中
    Pending,
    /// 远端运行中
    Running,
    /// 远端执行成功
    Succeeded,
    /// 远端执行失败
    Failed,
    /// 已取消
    Cancelled,
    /// 已过期
    Expired,
    /// 结果文件已下载
    JobFileDownloaded,
}

impl BatchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::NotStarted => "not_started",
            BatchJobStatus::Started => "started",
            BatchJobStatus::FileUploaded => "file_uploaded",
            BatchJobStatus::Unspecified => "unspecified",
            BatchJobStatus::Pending => "pending",
            BatchJobStatus::Running => "running",
            BatchJobStatus::Succeeded => "succeeded",
            BatchJobStatus::Failed => "failed",
            BatchJobStatus::Cancelled => "cancelled",
            BatchJobStatus::Expired => "expired",
            BatchJobStatus::JobFileDownloaded => "job_file_downloaded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(BatchJobStatus::NotStarted),
            "started" => Some(BatchJobStatus::Started),
            "file_uploaded" => Some(BatchJobStatus::FileUploaded),
            "unspecified" => Some(BatchJobStatus::Unspecified),
            "pending" => Some(BatchJobStatus::Pending),
            "running" => Some(BatchJobStatus::Running),
            "succeeded" => Some(BatchJobStatus::Succeeded),
            "failed" => Some(BatchJobStatus::Failed),
            "cancelled" => Some(BatchJobStatus::Cancelled),
            "expired" => Some(BatchJobStatus::Expired),
            "job_file_downloaded" => Some(BatchJobStatus::JobFileDownloaded),
            _ => None,
        }
    }

    /// 远端任务状态 → 本地状态
    ///
    /// 缺失状态按 `Pending` 处理，无法识别的状态映射为 `Unspecified`。
    /// 兼容 `BATCH_STATE_*`、`JOB_STATE_*` 以及不带前缀的写法。
    pub fn from_remote_state(state: Option<&str>) -> Self {
        let Some(raw) = state else {
            return BatchJobStatus::Pending;
        };
        let normalized = raw.trim().to_ascii_uppercase();
        let name = normalized
            .strip_prefix("BATCH_STATE_")
            .or_else(|| normalized.strip_prefix("JOB_STATE_"))
            .unwrap_or(&normalized);

        match name {
            "PENDING" | "QUEUED" => BatchJobStatus::Pending,
            "RUNNING" => BatchJobStatus::Running,
            "SUCCEEDED" => BatchJobStatus::Succeeded,
            "FAILED" => BatchJobStatus::Failed,
            "CANCELLED" => BatchJobStatus::Cancelled,
            "EXPIRED" => BatchJobStatus::Expired,
            _ => BatchJobStatus::Unspecified,
        }
    }

    /// 终态：不会再自动推进
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchJobStatus::Succeeded
                | BatchJobStatus::Failed
                | BatchJobStatus::Cancelled
                | BatchJobStatus::Expired
                | BatchJobStatus::JobFileDownloaded
        )
    }

    /// 需要用户重试（丢弃旧任务重新创建）的状态
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            BatchJobStatus::Failed
                | BatchJobStatus::Cancelled
                | BatchJobStatus::Expired
                | BatchJobStatus::Unspecified
        )
    }

    /// 远端任务已创建，需要轮询的状态
    pub fn is_remote_active(&self) -> bool {
        matches!(self, BatchJobStatus::Pending | BatchJobStatus::Running)
    }

    /// 可以被取消的状态
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            BatchJobStatus::NotStarted
                | BatchJobStatus::Started
                | BatchJobStatus::FileUploaded
                | BatchJobStatus::Pending
                | BatchJobStatus::Running
        )
    }

    /// 在偏序中的位置，状态只能前进不能后退
    pub fn rank(&self) -> u8 {
        match self {
            BatchJobStatus::NotStarted => 0,
            BatchJobStatus::Started => 1,
            BatchJobStatus::FileUploaded => 2,
            BatchJobStatus::Pending => 3,
            BatchJobStatus::Running => 4,
            BatchJobStatus::Succeeded
            | BatchJobStatus::Failed
            | BatchJobStatus::Cancelled
            | BatchJobStatus::Expired
            | BatchJobStatus::Unspecified => 5,
            BatchJobStatus::JobFileDownloaded => 6,
        }
    }
}

impl Default for BatchJobStatus {
    fn default() -> Self {
        BatchJobStatus::NotStarted
    }
}

impl std::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 远端文件状态（与本地文件状态 1:1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFileStatus {
    Unspecified,
    Processing,
    Active,
    Failed,
}

impl RemoteFileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteFileStatus::Unspecified => "unspecified",
            RemoteFileStatus::Processing => "processing",
            RemoteFileStatus::Active => "active",
            RemoteFileStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unspecified" => Some(RemoteFileStatus::Unspecified),
            "processing" => Some(RemoteFileStatus::Processing),
            "active" => Some(RemoteFileStatus::Active),
            "failed" => Some(RemoteFileStatus::Failed),
            _ => None,
        }
    }

    /// 远端文件状态 → 本地状态，未知值映射为 `Unspecified`
    pub fn from_remote_state(state: Option<&str>) -> Self {
        match state.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("PROCESSING") => RemoteFileStatus::Processing,
            Some("ACTIVE") => RemoteFileStatus::Active,
            Some("FAILED") => RemoteFileStatus::Failed,
            _ => RemoteFileStatus::Unspecified,
        }
    }
}
