//! 加载状态机
//!
//! 管理会话加载阶段的转换

use pacs_core::{PacsError, Result};
use std::collections::HashMap;

/// 加载阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    Idle,
    Loading,
    Loaded,
    LoadFailed,
}

/// 加载阶段转换事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadEvent {
    Started,
    Succeeded,
    Failed,
}

/// 加载状态机
#[derive(Debug)]
pub struct LoadStateMachine {
    transitions: HashMap<(LoadPhase, LoadEvent), LoadPhase>,
}

impl LoadStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((LoadPhase::Idle, LoadEvent::Started), LoadPhase::Loading);
        transitions.insert((LoadPhase::Loaded, LoadEvent::Started), LoadPhase::Loading);
        transitions.insert((LoadPhase::LoadFailed, LoadEvent::Started), LoadPhase::Loading);
        // 强制重新加载会取代进行中的聚合
        transitions.insert((LoadPhase::Loading, LoadEvent::Started), LoadPhase::Loading);
        transitions.insert((LoadPhase::Loading, LoadEvent::Succeeded), LoadPhase::Loaded);
        transitions.insert((LoadPhase::Loading, LoadEvent::Failed), LoadPhase::LoadFailed);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: LoadPhase, event: LoadEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: LoadPhase, event: LoadEvent) -> Result<LoadPhase> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(PacsError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }
}

impl Default for LoadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
