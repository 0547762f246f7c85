//! Project Context - Errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("无效的项目名称: {0}")]
    InvalidName(&'static str),

    #[error("无效的模型标识: {0}")]
    InvalidModel(String),
}
