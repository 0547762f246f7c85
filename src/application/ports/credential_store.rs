//! Credential Store Port - 项目 API 凭据

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No API key stored for project {0}")]
    Missing(Uuid),

    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Credential Store Port
///
/// API Key 按项目 ID 存放在安全存储中，不进入任务存储
pub trait CredentialStorePort: Send + Sync {
    /// 读取项目的 API Key
    fn get_api_key(&self, project_id: Uuid) -> Result<Option<String>, CredentialError>;

    /// 写入项目的 API Key
    fn set_api_key(&self, project_id: Uuid, api_key: String) -> Result<(), CredentialError>;

    /// 删除项目的 API Key
    fn delete_api_key(&self, project_id: Uuid) -> Result<(), CredentialError>;

    /// 读取 API Key，不存在时报错
    fn require_api_key(&self, project_id: Uuid) -> Result<String, CredentialError> {
        self.get_api_key(project_id)?
            .ok_or(CredentialError::Missing(project_id))
    }
}
