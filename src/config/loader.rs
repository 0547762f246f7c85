//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// # 环境变量示例
/// - `BATCHDESK_API__BASE_URL=http://localhost:9000`
/// - `BATCHDESK_API__DEFAULT_MODEL=gemini-2.5-pro`
/// - `BATCHDESK_RUNNER__POLL_INTERVAL_SECS=10`
/// - `BATCHDESK_DATABASE__PATH=/data/batchdesk.db`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("api.base_url", "https://generativelanguage.googleapis.com")?
        .set_default("api.api_version", "v1beta")?
        .set_default("api.timeout_secs", 120)?
        .set_default("api.upload_timeout_secs", 600)?
        .set_default("api.default_model", "gemini-2.5-flash")?
        .set_default("runner.file_poll_interval_secs", 5)?
        .set_default("runner.file_poll_timeout_secs", 600)?
        .set_default("runner.poll_interval_secs", 30)?
        .set_default("runner.max_poll_interval_secs", 300)?
        .set_default("runner.backoff_multiplier", 2.0)?
        .set_default("runner.max_polls", 0)?
        .set_default("database.path", "data/batchdesk.db")?
        .set_default("database.max_connections", 5)?
        .set_default("storage.projects_dir", "data/projects")?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 例如: BATCHDESK_API__BASE_URL=http://localhost:9000
    builder = builder.add_source(
        Environment::with_prefix("BATCHDESK")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.api.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "API base URL cannot be empty".to_string(),
        ));
    }

    if config.api.default_model.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "Default model cannot be empty".to_string(),
        ));
    }

    if config.database.path.is_empty() {
        return Err(ConfigError::ValidationError(
            "Database path cannot be empty".to_string(),
        ));
    }

    let runner = &config.runner;
    if runner.poll_interval_secs == 0 || runner.file_poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "Poll intervals must be greater than 0".to_string(),
        ));
    }

    if !(runner.backoff_multiplier >= 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "Backoff multiplier must be at least 1.0, got {}",
            runner.backoff_multiplier
        )));
    }

    if runner.max_poll_interval_secs < runner.poll_interval_secs {
        return Err(ConfigError::ValidationError(
            "Max poll interval cannot be shorter than the initial interval".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志），不输出 API Key
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("API: {}/{}", config.api.base_url, config.api.api_version);
    tracing::info!("API Timeout: {}s (upload {}s)", config.api.timeout_secs, config.api.upload_timeout_secs);
    tracing::info!("Default Model: {}", config.api.default_model);
    tracing::info!(
        "Fallback API Key: {}",
        if config.api.api_key.is_some() { "configured" } else { "not set" }
    );
    tracing::info!(
        "Poll Interval: {}s -> {}s (x{})",
        config.runner.poll_interval_secs,
        config.runner.max_poll_interval_secs,
        config.runner.backoff_multiplier
    );
    if let Some(max_polls) = config.runner.max_polls() {
        tracing::info!("Max Polls per Run: {}", max_polls);
    }
    tracing::info!("Database: {}", config.database.path);
    tracing::info!("Database Max Connections: {}", config.database.max_connections);
    tracing::info!("Projects Directory: {:?}", config.storage.projects_dir);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
