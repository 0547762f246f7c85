//! Project Context - Aggregate Root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProjectError;

/// 项目名称
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(name: impl Into<String>) -> Result<Self, ProjectError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ProjectError::InvalidName("名称不能为空"));
        }
        if name.chars().count() > 200 {
            return Err(ProjectError::InvalidName("名称长度不能超过200字符"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Project 聚合根
///
/// 拥有输入文件；API 凭据保存在外部凭据存储中，不在这里。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: ProjectName,
    /// 选择的模型标识，例如 `gemini-2.5-flash`
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: ProjectName, model: impl Into<String>) -> Result<Self, ProjectError> {
        let model = Self::validate_model(model.into())?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            model,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn rename(&mut self, name: ProjectName) {
        self.name = name;
        self.updated_at = Utc::now();
    }

    pub fn select_model(&mut self, model: impl Into<String>) -> Result<(), ProjectError> {
        self.model = Self::validate_model(model.into())?;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn validate_model(model: String) -> Result<String, ProjectError> {
        let model = model.trim();
        if model.is_empty() || model.contains(char::is_whitespace) {
            return Err(ProjectError::InvalidModel(model.to_string()));
        }
        Ok(model.strip_prefix("models/").unwrap_or(model).to_string())
    }
}
