//! # PACS归档客户端模块
//!
//! 与影像归档REST接口交互，包括：
//! - 归档连接配置的加载与验证
//! - 可替换的HTTP传输层（基本认证、超时）
//! - 按资源类型的标识列表、记录获取、存活探测和实例上传
//! - 文件、预览和WADO-URI检索地址的生成

pub mod client;
pub mod config;
pub mod locator;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ArchiveClient, ArchiveRecord, ResourceKind};
pub use config::ArchiveConfig;
pub use locator::Locator;
pub use transport::{ArchiveTransport, AuthenticationConfig, HttpTransport};
