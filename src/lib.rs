//! # Clinlab
//!
//! 检验医嘱生命周期与结果分析引擎的门面包，汇总各成员库：
//! - `core`：领域模型、结果值、范围表达式与错误
//! - `database`：医嘱仓储
//! - `integration`：外部协作方接口与适配器
//! - `workflow`：医嘱生命周期引擎

pub use clinlab_core as core;
pub use clinlab_database as database;
pub use clinlab_integration as integration;
pub use clinlab_workflow as workflow;

pub use clinlab_core::{ClinlabError, ErrorKind, Result};
pub use clinlab_workflow::{Collaborators, EngineSettings, OrderLifecycleManager};
