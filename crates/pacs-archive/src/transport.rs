//! 归档传输层
//!
//! 负责向归档基础地址发起已认证的请求，并把HTTP状态映射为统一错误类型。

use async_trait::async_trait;
use pacs_core::{utils::normalize_base_url, PacsError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ArchiveConfig;

/// 认证配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationConfig {
    None,
    BasicAuth {
        username: String,
        password: Option<String>,
    },
}

impl AuthenticationConfig {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        match &config.username {
            Some(username) => Self::BasicAuth {
                username: username.clone(),
                password: config.password.clone(),
            },
            None => Self::None,
        }
    }
}

/// 请求发起方接口
///
/// `path` 为相对于归档基础地址的资源路径，例如 `/patients`。
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// 发起GET请求并返回响应体
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// 以multipart形式提交单个文件
    async fn post_multipart(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>>;
}

/// 基于reqwest的HTTP传输层
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    authentication: AuthenticationConfig,
}

impl HttpTransport {
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PacsError::Config(format!("Could not initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            authentication: AuthenticationConfig::from_config(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 添加认证头
    fn add_auth_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authentication {
            AuthenticationConfig::None => request,
            AuthenticationConfig::BasicAuth { username, password } => {
                request.basic_auth(username, password.as_ref())
            }
        }
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .add_auth_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| PacsError::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PacsError::NotFound(url));
        }
        if !status.is_success() {
            return Err(PacsError::Transport(format!("HTTP {} for {}", status, url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PacsError::Transport(format!("Could not read response body from {}: {}", url, e)))?;
        Ok(body.to_vec())
    }

    async fn post_multipart(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let url = self.url(path);
        debug!("POST {} ({} bytes)", url, payload.len());

        let part = reqwest::multipart::Part::bytes(payload)
            .file_name(file_name.to_string())
            .mime_str("application/dicom")
            .map_err(|e| PacsError::InvalidRequest(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);

        let response = self
            .add_auth_headers(self.client.post(&url).multipart(form))
            .send()
            .await
            .map_err(|e| PacsError::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unable to read error body"));
            return Err(PacsError::Upload(format!("HTTP {} for {}: {}", status, url, detail)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PacsError::Transport(format!("Could not read response body from {}: {}", url, e)))?;
        Ok(body.to_vec())
    }
}
