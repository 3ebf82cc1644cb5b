//! 归档连接配置
//!
//! 配置在初始化后只读，由客户端和传输层共享。

use config::{Config, Environment, File};
use pacs_core::{PacsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// 归档连接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// 归档基础地址
    pub base_url: String,
    /// 基本认证用户名
    pub username: Option<String>,
    /// 基本认证密码
    pub password: Option<String>,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 存活探测超时（秒）
    pub probe_timeout_secs: u64,
    /// 每层并发请求上限
    pub max_concurrency: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8042".to_string(),
            username: Some("orthanc".to_string()),
            password: Some("orthanc".to_string()),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            probe_timeout_secs: 5,
            max_concurrency: 8,
        }
    }
}

impl ArchiveConfig {
    /// 加载配置：可选的配置文件，随后是 `PACS_` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("PACS").try_parsing(true))
            .build()
            .map_err(|e| PacsError::Config(e.to_string()))?;

        let config: ArchiveConfig = settings
            .try_deserialize()
            .map_err(|e| PacsError::Config(format!("Failed to deserialize configuration: {}", e)))?;
        config.validate()?;

        info!(
            "Archive configuration loaded: base_url={}, max_concurrency={}",
            config.base_url, config.max_concurrency
        );
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(PacsError::Config("base_url must not be empty".to_string()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(PacsError::Config(format!(
                "base_url must be an http(s) URL: {}",
                base_url
            )));
        }
        if self.connect_timeout_secs == 0
            || self.request_timeout_secs == 0
            || self.probe_timeout_secs == 0
        {
            return Err(PacsError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(PacsError::Config("max_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
