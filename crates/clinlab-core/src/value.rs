//! 检验结果值类型
//!
//! 结果值以字符串形式上报，可能是数值、定性结论（阳性/阴性）、日期或超量程文本（如 ">1000"）。
//! 这里在入口处一次性解析成带标签的值，比较只在同类值之间进行，不做隐式数值转换。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 解析后的结果值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ObservedValue {
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Text(String),
}

impl ObservedValue {
    /// 从上报的原始字符串解析
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let Ok(number) = trimmed.parse::<f64>() {
            // "NaN"、"inf" 之类不作为数值参与范围判断
            if number.is_finite() {
                return ObservedValue::Number(number);
            }
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return ObservedValue::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return ObservedValue::Boolean(false);
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return ObservedValue::Date(date);
        }

        ObservedValue::Text(trimmed.to_string())
    }

    /// 数值结果
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ObservedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ObservedValue::Number(_))
    }

    /// 同类值比较，不同类返回 None
    ///
    /// 文本只支持相等判断。
    pub fn compare(&self, other: &ObservedValue) -> Option<Ordering> {
        match (self, other) {
            (ObservedValue::Number(a), ObservedValue::Number(b)) => a.partial_cmp(b),
            (ObservedValue::Boolean(a), ObservedValue::Boolean(b)) => Some(a.cmp(b)),
            (ObservedValue::Date(a), ObservedValue::Date(b)) => Some(a.cmp(b)),
            (ObservedValue::Text(a), ObservedValue::Text(b)) => {
                if a.eq_ignore_ascii_case(b) {
                    Some(Ordering::Equal)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedValue::Number(n) => write!(f, "{}", n),
            ObservedValue::Boolean(b) => write!(f, "{}", b),
            ObservedValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ObservedValue::Text(t) => write!(f, "{}", t),
        }
    }
}
