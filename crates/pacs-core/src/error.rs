//! 错误定义模块

use thiserror::Error;

/// PACS系统统一错误类型
#[derive(Error, Debug)]
pub enum PacsError {
    /// 网络、超时或服务端5xx等可能是暂时性的故障
    #[error("传输错误: {0}")]
    Transport(String),

    /// 归档中不存在所引用的资源 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 上传二进制内容时归档返回非2xx
    #[error("上传错误: {0}")]
    Upload(String),

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl PacsError {
    /// 是否值得由调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// PACS系统统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;
