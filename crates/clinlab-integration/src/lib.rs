//! # 检验外部协作方集成模块
//!
//! 提供引擎依赖的外部协作方接口及其适配器：
//! - 外部检验机构接口网关（HTTP）
//! - 通知分发（Webhook/日志）与有界通知工作池
//! - 临床校验与临床档案服务
//! - 文档存储
//! - 患者/医生身份目录

pub mod clinical;
pub mod documents;
pub mod gateway;
pub mod identity;
pub mod notification;
pub mod queue;

pub use clinical::{ClinicalFinding, ClinicalRecord, ClinicalValidation, PermissiveClinicalService, Verdict};
pub use documents::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
pub use gateway::{
    AuthenticationConfig, GatewayOrder, GatewayReceipt, HttpGatewayConfig, HttpLabGateway,
    InterfaceComponentValue, InterfaceResult, LabGateway,
};
pub use identity::{IdentityDirectory, StaticDirectory};
pub use notification::{
    LogDispatcher, Notification, NotificationDispatcher, NotificationKind, Urgency,
    WebhookDispatcher,
};
pub use queue::{NotificationQueue, QueueSettings, QueueStats};
