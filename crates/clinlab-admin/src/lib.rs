//! # 检验系统管理模块
//!
//! 提供运维侧能力：
//! - 配置加载、校验、热重载与保存
//! - 日志订阅者初始化

pub mod config;
pub mod logging;

pub use config::{
    ClinlabConfig, ConfigManager, ConfigValidator, DatabaseBackend, DatabaseConfig,
    DocumentsConfig, EngineConfig, GatewayConfig, LoggingConfig, NotificationsConfig,
};
pub use logging::{build_filter, init_tracing, LogFormat};
