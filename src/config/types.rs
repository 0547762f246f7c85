//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 远端 Batch API 配置
    #[serde(default)]
    pub api: ApiConfig,

    /// Runner 轮询配置
    #[serde(default)]
    pub runner: RunnerConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 远端 Batch API 配置
#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    /// API 基础 URL
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// API 版本路径段
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// 上传与下载的超时时间（秒）
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// 新项目的默认模型
    #[serde(default = "default_model")]
    pub default_model: String,

    /// 项目未设置 Key 时使用的默认 Key
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_api_version() -> String {
    "v1beta".to_string()
}

fn default_api_timeout() -> u64 {
    120
}

fn default_upload_timeout() -> u64 {
    600
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_api_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            default_model: default_model(),
            api_key: None,
        }
    }
}

// API Key 不进入日志
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("default_model", &self.default_model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Runner 轮询配置
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// 远端文件处理中时的查询间隔（秒）
    #[serde(default = "default_file_poll_interval")]
    pub file_poll_interval_secs: u64,

    /// 等待远端文件处理完成的上限（秒）
    #[serde(default = "default_file_poll_timeout")]
    pub file_poll_timeout_secs: u64,

    /// 任务轮询初始间隔（秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// 退避后的最大间隔（秒）
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// 单次运行的最大轮询次数，0 表示直到终态
    #[serde(default)]
    pub max_polls: u32,
}

fn default_file_poll_interval() -> u64 {
    5
}

fn default_file_poll_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_poll_interval() -> u64 {
    300
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            file_poll_interval_secs: default_file_poll_interval(),
            file_poll_timeout_secs: default_file_poll_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_poll_interval_secs: default_max_poll_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            max_polls: 0,
        }
    }
}

impl RunnerConfig {
    pub fn file_poll_interval(&self) -> Duration {
        Duration::from_secs(self.file_poll_interval_secs)
    }

    pub fn file_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.file_poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    pub fn max_polls(&self) -> Option<u32> {
        (self.max_polls > 0).then_some(self.max_polls)
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_db_path")]
    pub path: String,

    /// 最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/batchdesk.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// 获取数据库 URL
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 项目目录根路径，每个项目一个子目录
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("data/projects")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LogConfig {
    /// EnvFilter 指令：全局级别 + 本 crate 级别
    pub fn filter_directive(&self) -> String {
        format!("{level},batchdesk={level}", level = self.level)
    }
}
