//! File Storage Port - 出站端口
//!
//! 定义项目目录内文件（输入副本、结果文件）的存储接口

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// 文件存储错误，携带操作名与路径
#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("File not found during {operation}: {path}")]
    FileNotFound { operation: &'static str, path: PathBuf },

    #[error("Permission denied during {operation}: {path}")]
    PermissionDenied { operation: &'static str, path: PathBuf },

    #[error("Could not create directory {path}: {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    #[error("Unsupported file type: {path}")]
    InvalidFileType { path: PathBuf },

    #[error("IO error during {operation} on {path}: {reason}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl FileStorageError {
    /// 按 `io::ErrorKind` 映射
    pub fn from_io(operation: &'static str, path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => FileStorageError::FileNotFound { operation, path },
            io::ErrorKind::PermissionDenied => {
                FileStorageError::PermissionDenied { operation, path }
            }
            _ => FileStorageError::Io {
                operation,
                path,
                reason: err.to_string(),
            },
        }
    }
}

/// 导入后的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
}

/// File Storage Port
///
/// 所有路径都位于项目 ID 派生的目录下
#[async_trait]
pub trait FileStoragePort: Send + Sync {
    /// 项目目录
    fn project_dir(&self, project_id: Uuid) -> PathBuf;

    /// 把外部文件复制到项目目录（仅 `.jsonl`）
    async fn import_file(
        &self,
        project_id: Uuid,
        source: &Path,
    ) -> Result<StoredFile, FileStorageError>;

    /// 读取文件内容
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FileStorageError>;

    /// 写入结果文件，返回路径
    async fn write_results(
        &self,
        project_id: Uuid,
        file_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, FileStorageError>;

    /// 删除文件（文件不存在不视为错误）
    async fn delete_file(&self, path: &Path) -> Result<(), FileStorageError>;

    /// 删除整个项目目录
    async fn delete_project_dir(&self, project_id: Uuid) -> Result<(), FileStorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let path = Path::new("/tmp/missing.jsonl");
        let err = FileStorageError::from_io("read", path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, FileStorageError::FileNotFound { operation: "read", .. }));

        let err = FileStorageError::from_io(
            "write",
            path,
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, FileStorageError::PermissionDenied { .. }));

        let err = FileStorageError::from_io("copy", path, io::Error::other("disk full"));
        assert!(err.to_string().contains("/tmp/missing.jsonl"));
    }
}
