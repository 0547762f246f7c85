//! Batch File Commands

use std::path::PathBuf;
use uuid::Uuid;

/// 导入输入文件命令（复制到项目目录）
#[derive(Debug, Clone)]
pub struct ImportBatchFile {
    pub project_id: Uuid,
    pub source: PathBuf,
}

/// 删除输入文件命令
#[derive(Debug, Clone)]
pub struct DeleteBatchFile {
    pub file_id: Uuid,
}
