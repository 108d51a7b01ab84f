//! 医嘱状态机
//!
//! 管理检验医嘱的完整生命周期状态转换

use clinlab_core::{ClinlabError, OrderStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 医嘱状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    Submit,
    ResultRecorded,
    AllItemsResulted,
    Cancel,
}

/// 医嘱状态机
#[derive(Debug)]
pub struct OrderStateMachine {
    transitions: HashMap<(OrderStatus, OrderEvent), OrderStatus>,
}

impl OrderStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((OrderStatus::Pending, OrderEvent::Submit), OrderStatus::Submitted);
        transitions.insert((OrderStatus::Submitted, OrderEvent::ResultRecorded), OrderStatus::ResultsPending);
        transitions.insert((OrderStatus::ResultsPending, OrderEvent::ResultRecorded), OrderStatus::ResultsPending);
        transitions.insert((OrderStatus::ResultsPending, OrderEvent::AllItemsResulted), OrderStatus::Completed);
        transitions.insert((OrderStatus::Pending, OrderEvent::Cancel), OrderStatus::Cancelled);
        transitions.insert((OrderStatus::Submitted, OrderEvent::Cancel), OrderStatus::Cancelled);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: OrderStatus, event: OrderEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: OrderStatus, event: OrderEvent) -> Result<OrderStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| ClinlabError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            })
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current: OrderStatus) -> Vec<OrderEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for OrderStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
