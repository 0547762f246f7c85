//! File Storage - 项目目录文件存储实现
//!
//! 实现 FileStoragePort trait，布局:
//! {projects_dir}/{project_id}/{输入文件与结果文件}

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::application::ports::{FileStorageError, FileStoragePort, StoredFile};
use crate::domain::batch::BatchInputFile;

/// 文件系统项目存储
pub struct LocalFileStorage {
    /// 存储根目录
    base_dir: PathBuf,
}

impl LocalFileStorage {
    /// 创建新的文件存储
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self, FileStorageError> {
        let base_dir = base_dir.as_ref().to_path_buf();

        // 确保目录存在
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| FileStorageError::DirectoryCreationFailed {
                path: base_dir.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { base_dir })
    }

    /// 获取存储根目录
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn ensure_project_dir(&self, project_id: Uuid) -> Result<PathBuf, FileStorageError> {
        let dir = self.project_dir(project_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| FileStorageError::DirectoryCreationFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        Ok(dir)
    }

    /// 目标文件名已存在时追加序号：`input (1).jsonl`
    async fn unique_target(dir: &Path, file_name: &str) -> PathBuf {
        let candidate = dir.join(file_name);
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }

        let path = Path::new(file_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
        let ext = path.extension().and_then(|s| s.to_str());
        let mut n = 1;
        loop {
            let name = match ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            let candidate = dir.join(name);
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl FileStoragePort for LocalFileStorage {
    fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.base_dir.join(project_id.to_string())
    }

    async fn import_file(
        &self,
        project_id: Uuid,
        source: &Path,
    ) -> Result<StoredFile, FileStorageError> {
        BatchInputFile::validate_source(source).map_err(|_| FileStorageError::InvalidFileType {
            path: source.to_path_buf(),
        })?;

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileStorageError::InvalidFileType {
                path: source.to_path_buf(),
            })?
            .to_string();

        let dir = self.ensure_project_dir(project_id).await?;
        let target = Self::unique_target(&dir, &file_name).await;

        let size_bytes = fs::copy(source, &target)
            .await
            .map_err(|e| FileStorageError::from_io("import", source, e))?;

        tracing::debug!(
            project_id = %project_id,
            source = %source.display(),
            target = %target.display(),
            size_bytes,
            "Imported input file"
        );

        let display_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or(file_name);

        Ok(StoredFile {
            path: target,
            display_name,
            size_bytes,
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FileStorageError> {
        fs::read(path)
            .await
            .map_err(|e| FileStorageError::from_io("read", path, e))
    }

    async fn write_results(
        &self,
        project_id: Uuid,
        file_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, FileStorageError> {
        let dir = self.ensure_project_dir(project_id).await?;
        let path = dir.join(file_name);

        fs::write(&path, data)
            .await
            .map_err(|e| FileStorageError::from_io("write results", &path, e))?;

        tracing::debug!(
            project_id = %project_id,
            path = %path.display(),
            size = data.len(),
            "Saved results file"
        );

        Ok(path)
    }

    async fn delete_file(&self, path: &Path) -> Result<(), FileStorageError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileStorageError::from_io("delete", path, e)),
        }
    }

    async fn delete_project_dir(&self, project_id: Uuid) -> Result<(), FileStorageError> {
        let dir = self.project_dir(project_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(project_id = %project_id, "Deleted project directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileStorageError::from_io("delete project", &dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_import_and_read_file() {
        let temp_dir = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path()).await.unwrap();
        let project_id = Uuid::new_v4();

        let source = source_dir.path().join("requests.jsonl");
        std::fs::write(&source, b"{\"key\":\"1\"}\n").unwrap();

        // Import
        let stored = storage.import_file(project_id, &source).await.unwrap();
        assert_eq!(stored.display_name, "requests.jsonl");
        assert_eq!(stored.size_bytes, 12);
        assert!(stored.path.starts_with(storage.project_dir(project_id)));

        // Read
        let data = storage.read_file(&stored.path).await.unwrap();
        assert_eq!(data, b"{\"key\":\"1\"}\n");

        // 同名再次导入不覆盖
        let second = storage.import_file(project_id, &source).await.unwrap();
        assert_eq!(second.display_name, "requests (1).jsonl");
        assert_ne!(second.path, stored.path);
    }

    #[tokio::test]
    async fn test_import_rejects_non_jsonl() {
        let temp_dir = tempdir().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path()).await.unwrap();
        let source = temp_dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();

        let err = storage.import_file(Uuid::new_v4(), &source).await.unwrap_err();
        assert!(matches!(err, FileStorageError::InvalidFileType { .. }));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let temp_dir = tempdir().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path()).await.unwrap();
        let err = storage
            .read_file(&temp_dir.path().join("gone.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileStorageError::FileNotFound { operation: "read", .. }));
    }

    #[tokio::test]
    async fn test_write_results_and_delete_project() {
        let temp_dir = tempdir().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path()).await.unwrap();
        let project_id = Uuid::new_v4();

        let path = storage
            .write_results(project_id, "requests_results.jsonl", b"{}")
            .await
            .unwrap();
        assert!(path.exists());

        storage.delete_file(&path).await.unwrap();
        assert!(!path.exists());
        // 重复删除不报错
        storage.delete_file(&path).await.unwrap();

        storage.delete_project_dir(project_id).await.unwrap();
        assert!(!storage.project_dir(project_id).exists());
        storage.delete_project_dir(project_id).await.unwrap();
    }
}
