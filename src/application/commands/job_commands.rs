//! Batch Job Commands
//!
//! 任务与输入文件一一对应，命令按文件 ID 寻址

use uuid::Uuid;

/// 运行任务命令（不存在时创建）
#[derive(Debug, Clone)]
pub struct RunBatchJob {
    pub file_id: Uuid,
}

/// 重试命令：丢弃旧任务，以全新任务重新运行
#[derive(Debug, Clone)]
pub struct RetryBatchJob {
    pub file_id: Uuid,
}

/// 取消任务命令
#[derive(Debug, Clone)]
pub struct CancelBatchJob {
    pub file_id: Uuid,
}

/// 下载结果命令
#[derive(Debug, Clone)]
pub struct DownloadBatchResults {
    pub file_id: Uuid,
}
