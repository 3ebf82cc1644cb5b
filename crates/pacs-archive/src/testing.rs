//! 脚本化传输层
//!
//! 按路径预置响应并记录所有请求，用于在不依赖真实归档的情况下测试客户端和上层逻辑。

use async_trait::async_trait;
use pacs_core::{PacsError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::transport::ArchiveTransport;

#[derive(Debug, Clone)]
enum Reply {
    Body(Vec<u8>),
    Fail(String),
    Reject(String),
}

/// 脚本化传输层，未预置的路径返回 `NotFound`
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    delay: Option<Duration>,
    path_delays: HashMap<String, Duration>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, path: &str, value: serde_json::Value) -> Self {
        self.script_json(path, value);
        self
    }

    /// 该路径返回传输错误
    pub fn with_failure(self, path: &str, message: &str) -> Self {
        self.script_failure(path, message);
        self
    }

    /// 该路径的上传被归档拒绝
    pub fn with_upload_rejection(self, path: &str, message: &str) -> Self {
        self.script(path, Reply::Reject(message.to_string()));
        self
    }

    /// 替换该路径的响应，对之后的请求生效
    pub fn script_json(&self, path: &str, value: serde_json::Value) {
        self.script(path, Reply::Body(value.to_string().into_bytes()));
    }

    pub fn script_failure(&self, path: &str, message: &str) {
        self.script(path, Reply::Fail(message.to_string()));
    }

    fn script(&self, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_string(), reply);
    }

    /// 每个GET请求的响应延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_path_delay(mut self, path: &str, delay: Duration) -> Self {
        self.path_delays.insert(path.to_string(), delay);
        self
    }

    /// 按发起顺序返回已记录的请求
    pub fn requests(&self) -> Vec<String> {
        self.lock_requests().clone()
    }

    /// 指定GET路径被请求的次数
    pub fn get_count(&self, path: &str) -> usize {
        let expected = format!("GET {}", path);
        self.lock_requests()
            .iter()
            .filter(|request| **request == expected)
            .count()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reply(&self, path: &str) -> Result<Vec<u8>> {
        let replies = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match replies.get(path) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Fail(message)) => Err(PacsError::Transport(message.clone())),
            Some(Reply::Reject(message)) => Err(PacsError::Upload(message.clone())),
            None => Err(PacsError::NotFound(path.to_string())),
        }
    }
}

#[async_trait]
impl ArchiveTransport for ScriptedTransport {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.lock_requests().push(format!("GET {}", path));

        if let Some(delay) = self.path_delays.get(path).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.reply(path)
    }

    async fn post_multipart(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.lock_requests().push(format!(
            "POST {} {}={} ({} bytes)",
            path,
            field,
            file_name,
            payload.len()
        ));
        self.reply(path)
    }
}
