//! # 检验工作流模块
//!
//! 提供检验医嘱从开单到审核的完整流程，包括：
//! - 医嘱状态机：管理检验医嘱的生命周期
//! - 科室路由与工作队列：院内医嘱按规则分配到检验科室
//! - 趋势分析：与患者历史结果比较
//! - 危急值处理：确保危急结果及时通知开单医生和主管

pub mod alerting;
pub mod engine;
pub mod metrics;
pub mod routing;
pub mod rules;
pub mod sequence;
pub mod settings;
pub mod state_machine;
pub mod trend;
pub mod worklist;

#[cfg(test)]
mod testing;

// 重新导出主要类型
pub use alerting::{AlertDispatcher, RaisedAlert};
pub use engine::{BatchItemError, BatchOutcome, Collaborators, OrderLifecycleManager, ResultRecording, SystemOverview};
pub use metrics::EngineMetrics;
pub use routing::{DepartmentRouter, RoutingDecision, RoutingRule, RuleAction, RuleCondition};
pub use sequence::{DailyOrderNumberGenerator, OrderNumberGenerator};
pub use settings::EngineSettings;
pub use state_machine::{OrderEvent, OrderStateMachine};
pub use trend::{compute_trend, TrendAnalyzer};
pub use worklist::{LabWorkQueue, WorkItem, WorkItemStatus, WorkQueueStats, Worksheet};
