//! 错误定义模块

use thiserror::Error;
use uuid::Uuid;

/// 检验系统统一错误类型
#[derive(Error, Debug)]
pub enum ClinlabError {
    #[error("验证错误: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("接口错误: {0}")]
    Interface(String),

    #[error("无法匹配的检验结果: 外部申请号 {external_order_id} (消息 {message_id})")]
    UnmatchedResult {
        external_order_id: String,
        message_id: String,
    },

    #[error("并发冲突: {entity} {id} 的版本 {expected_version} 已过期")]
    Concurrency {
        entity: &'static str,
        id: Uuid,
        expected_version: i64,
    },

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 前置条件校验失败原因
///
/// 每个前置条件对应一个独立的变体，调用方按变体分支而不是解析错误文本。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("患者不存在: {0}")]
    PatientNotFound(Uuid),

    #[error("开单医生不存在: {0}")]
    ProviderNotFound(Uuid),

    #[error("检验项目不存在: {0}")]
    TestNotFound(Uuid),

    #[error("检验项目已停用: {name}")]
    TestInactive { name: String },

    #[error("医嘱未包含任何检验项目")]
    NoTestsRequested,

    #[error("临床校验未通过: {0}")]
    ClinicalRejected(String),

    #[error("外部检验机构不可用: {0}")]
    ExternalLabUnavailable(Uuid),

    #[error("医嘱需要审批, 当前审批状态: {status}")]
    ApprovalRequired { status: String },

    #[error("医嘱不需要审批或审批已完成")]
    ApprovalNotPending,

    #[error("检验项目 {test} 要求空腹")]
    FastingRequired { test: String },

    #[error("需要保险授权")]
    AuthorizationRequired,

    #[error("医嘱不可取消: {0}")]
    CancellationNotAllowed(String),

    #[error("检验结果未包含任何结果值")]
    EmptyResult,

    #[error("组分 {component} 不属于检验项目 {test}")]
    ComponentNotInTest { component: Uuid, test: String },

    #[error("组分 {0} 在同一次结果中重复出现")]
    DuplicateComponent(Uuid),

    #[error("采集时间不能晚于当前时间")]
    CollectionInFuture,

    #[error("医嘱只能在待提交状态下修改")]
    OrderNotPending,

    #[error("授权号不能为空")]
    EmptyAuthorization,
}

/// 错误分类
///
/// 调用方根据分类决定是否重试、是否需要人工对账。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Interface,
    UnmatchedResult,
    Concurrency,
    Internal,
}

impl ClinlabError {
    /// 返回错误所属分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClinlabError::Validation(_) | ClinlabError::InvalidStateTransition { .. } => {
                ErrorKind::Validation
            }
            ClinlabError::NotFound(_) => ErrorKind::NotFound,
            ClinlabError::Interface(_) => ErrorKind::Interface,
            ClinlabError::UnmatchedResult { .. } => ErrorKind::UnmatchedResult,
            ClinlabError::Concurrency { .. } => ErrorKind::Concurrency,
            ClinlabError::Database(_)
            | ClinlabError::Config(_)
            | ClinlabError::Serialization(_)
            | ClinlabError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 是否可由调用方重新读取后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrency | ErrorKind::Interface)
    }

    /// 取出校验失败原因
    pub fn validation(&self) -> Option<&ValidationFailure> {
        match self {
            ClinlabError::Validation(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ClinlabError {
    fn from(e: sqlx::Error) -> Self {
        ClinlabError::Database(e.to_string())
    }
}

/// 检验系统统一结果类型
pub type Result<T> = std::result::Result<T, ClinlabError>;
