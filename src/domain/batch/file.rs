//! Batch Context - Input File Entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{remote_ttl, BatchDomainError, RemoteFileStatus};

/// 支持导入的输入文件扩展名
pub const INPUT_FILE_EXTENSION: &str = "jsonl";

/// 批处理输入文件
///
/// 属于且只属于一个 Project；远端字段在上传成功前为空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInputFile {
    pub id: Uuid,
    pub project_id: Uuid,
    pub display_name: String,
    /// 项目目录内的持久副本
    pub local_path: PathBuf,
    pub size_bytes: u64,
    /// 导入时间
    pub imported_at: DateTime<Utc>,
    pub remote_name: Option<String>,
    pub remote_uri: Option<String>,
    pub remote_status: Option<RemoteFileStatus>,
    pub remote_created_at: Option<DateTime<Utc>>,
    pub remote_expires_at: Option<DateTime<Utc>>,
    /// 下载后的结果文件
    pub result_path: Option<PathBuf>,
}

impl BatchInputFile {
    pub fn new(
        project_id: Uuid,
        display_name: impl Into<String>,
        local_path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            display_name: display_name.into(),
            local_path,
            size_bytes,
            imported_at: Utc::now(),
            remote_name: None,
            remote_uri: None,
            remote_status: None,
            remote_created_at: None,
            remote_expires_at: None,
            result_path: None,
        }
    }

    /// 校验导入文件类型（仅 `.jsonl`）
    pub fn validate_source(path: &Path) -> Result<(), BatchDomainError> {
        let is_jsonl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case(INPUT_FILE_EXTENSION));
        if is_jsonl {
            Ok(())
        } else {
            Err(BatchDomainError::InvalidFileType(
                path.display().to_string(),
            ))
        }
    }

    /// 远端文件是否已过期（创建时间 + 48 小时）
    ///
    /// 没有创建时间的上传记录视为已过期。
    pub fn is_remote_expired(&self, now: DateTime<Utc>) -> bool {
        match self.remote_created_at {
            Some(created_at) => now > created_at + remote_ttl(),
            None => true,
        }
    }

    /// 创建任务前是否必须（重新）上传
    pub fn needs_upload(&self, now: DateTime<Utc>) -> bool {
        self.remote_uri.is_none()
            || self.remote_name.is_none()
            || self.remote_status == Some(RemoteFileStatus::Failed)
            || self.is_remote_expired(now)
    }

    /// 记录一次成功上传后的远端元数据
    pub fn record_upload(
        &mut self,
        remote_name: String,
        remote_uri: String,
        status: RemoteFileStatus,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) {
        self.remote_name = Some(remote_name);
        self.remote_uri = Some(remote_uri);
        self.remote_status = Some(status);
        self.remote_created_at = Some(created_at);
        self.remote_expires_at = Some(expires_at);
    }

    /// 结果文件名：`{输入文件名}_results.jsonl`
    pub fn result_file_name(&self) -> String {
        let stem = Path::new(&self.display_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string());
        format!("{}_results.{}", stem, INPUT_FILE_EXTENSION)
    }
}
