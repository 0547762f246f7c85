//! Project Commands

use uuid::Uuid;

/// 创建项目命令
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub name: String,
    /// 为空时使用配置中的默认模型
    pub model: Option<String>,
}

/// 保存项目 API Key 命令
#[derive(Clone)]
pub struct SetProjectApiKey {
    pub project_id: Uuid,
    pub api_key: String,
}

impl std::fmt::Debug for SetProjectApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetProjectApiKey")
            .field("project_id", &self.project_id)
            .field("api_key", &"***")
            .finish()
    }
}

/// 删除项目命令
#[derive(Debug, Clone)]
pub struct DeleteProject {
    pub project_id: Uuid,
}
