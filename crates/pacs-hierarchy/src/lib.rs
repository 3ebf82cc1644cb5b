//! # PACS层级浏览模块
//!
//! 在归档客户端之上提供面向界面的浏览功能，包括：
//! - 层级聚合：按 患者 → 检查 → 序列 → 实例 并发获取并按患者分组
//! - 加载状态机：约束加载阶段之间的合法转换
//! - 会话状态：归档可用性、刷新合并与过期结果丢弃

pub mod aggregator;
pub mod session;
pub mod state_machine;

pub use aggregator::HierarchyAggregator;
pub use session::{ArchiveSession, Availability, Snapshot, ViewState, LOAD_FAILED_MESSAGE};
pub use state_machine::{LoadEvent, LoadPhase, LoadStateMachine};
