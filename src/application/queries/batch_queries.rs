//! Batch Queries

use uuid::Uuid;

/// 获取文件对应的任务（含有效状态）
#[derive(Debug, Clone)]
pub struct GetBatchJob {
    pub file_id: Uuid,
}

/// 列出项目的输入文件及任务摘要
#[derive(Debug, Clone)]
pub struct ListProjectFiles {
    pub project_id: Uuid,
}
