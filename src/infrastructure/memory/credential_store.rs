//! In-Memory Credential Store

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::ports::{CredentialError, CredentialStorePort};

/// 进程内凭据存储
///
/// 项目未单独设置 Key 时回退到配置中的默认 Key。
pub struct InMemoryCredentialStore {
    keys: DashMap<Uuid, String>,
    fallback: Option<String>,
}

impl InMemoryCredentialStore {
    pub fn new(fallback: Option<String>) -> Self {
        Self {
            keys: DashMap::new(),
            fallback: fallback.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialStorePort for InMemoryCredentialStore {
    fn get_api_key(&self, project_id: Uuid) -> Result<Option<String>, CredentialError> {
        Ok(self
            .keys
            .get(&project_id)
            .map(|key| key.value().clone())
            .or_else(|| self.fallback.clone()))
    }

    fn set_api_key(&self, project_id: Uuid, api_key: String) -> Result<(), CredentialError> {
        self.keys.insert(project_id, api_key);
        tracing::debug!(project_id = %project_id, "API key stored");
        Ok(())
    }

    fn delete_api_key(&self, project_id: Uuid) -> Result<(), CredentialError> {
        self.keys.remove(&project_id);
        Ok(())
    }
}
