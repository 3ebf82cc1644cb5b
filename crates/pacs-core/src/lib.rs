//! # PACS Core
//!
//! 影像归档浏览层的核心模块，提供归档记录模型、界面视图模型、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{PacsError, Result};
pub use models::*;
