//! # Clinlab Core
//!
//! 检验系统的核心模块，提供数据模型、结果值类型、范围表达式评估、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod range;
pub mod utils;
pub mod value;

pub use error::{ClinlabError, ErrorKind, Result, ValidationFailure};
pub use models::*;
pub use range::{evaluate, evaluate_abnormal, evaluate_critical, RangeExpr, RangeFlags, RangeSpec};
pub use value::ObservedValue;
