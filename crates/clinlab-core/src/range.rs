//! 参考范围与危急值范围
//!
//! 范围表达式是一个很小的封闭文法：
//! - 区间 `L-H`，例如 `3.5-5.0`、`-10--2`
//! - 比较 `<X`、`>X`、`<=X`、`>=X`
//! - 比较的 OR 组合，例如 `<2.5 OR >6.5`
//!
//! 表达式在加载参考数据时解析一次，评估时不再做字符串匹配。
//! 缺失或无法解析的表达式视为"无法评估"，标志保持 false，不会阻断医嘱流程。

use crate::value::ObservedValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn apply(self, value: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => value < bound,
            Comparison::Le => value <= bound,
            Comparison::Gt => value > bound,
            Comparison::Ge => value >= bound,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// 解析后的范围表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeExpr {
    Interval { lo: f64, hi: f64 },
    Comparator { op: Comparison, bound: f64 },
    Or(Vec<RangeExpr>),
}

/// 范围表达式解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeParseError {
    #[error("空的范围表达式")]
    Empty,

    #[error("无法识别的范围表达式: {0}")]
    Unrecognized(String),

    #[error("无效的数值边界: {0}")]
    InvalidBound(String),

    #[error("区间下限 {lo} 大于上限 {hi}")]
    InvertedInterval { lo: f64, hi: f64 },

    #[error("OR 组合只允许比较表达式: {0}")]
    InvalidDisjunct(String),
}

impl RangeExpr {
    /// 数值是否落在表达式描述的区域内
    pub fn contains(&self, value: f64) -> bool {
        match self {
            RangeExpr::Interval { lo, hi } => *lo <= value && value <= *hi,
            RangeExpr::Comparator { op, bound } => op.apply(value, *bound),
            RangeExpr::Or(parts) => parts.iter().any(|part| part.contains(value)),
        }
    }

    fn parse_single(token: &str) -> std::result::Result<RangeExpr, RangeParseError> {
        for (prefix, op) in [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("≤", Comparison::Le),
            ("≥", Comparison::Ge),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ] {
            if let Some(rest) = token.strip_prefix(prefix) {
                return Ok(RangeExpr::Comparator {
                    op,
                    bound: parse_bound(rest)?,
                });
            }
        }

        let split_at = token
            .char_indices()
            .skip(1)
            .find(|&(i, c)| {
                c == '-'
                    && token[..i]
                        .chars()
                        .last()
                        .map_or(false, |prev| prev.is_ascii_digit() || prev == '.')
            })
            .map(|(i, _)| i)
            .ok_or_else(|| RangeParseError::Unrecognized(token.to_string()))?;

        let lo = parse_bound(&token[..split_at])?;
        let hi = parse_bound(&token[split_at + 1..])?;
        if lo > hi {
            return Err(RangeParseError::InvertedInterval { lo, hi });
        }

        Ok(RangeExpr::Interval { lo, hi })
    }
}

fn parse_bound(text: &str) -> std::result::Result<f64, RangeParseError> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| RangeParseError::InvalidBound(text.to_string()))
}

impl FromStr for RangeExpr {
    type Err = RangeParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.replace("||", " OR ");
        let mut disjuncts: Vec<String> = vec![String::new()];

        for word in normalized.split_whitespace() {
            if word.eq_ignore_ascii_case("or") {
                disjuncts.push(String::new());
            } else if let Some(last) = disjuncts.last_mut() {
                last.push_str(word);
            }
        }

        if disjuncts.iter().all(|d| d.is_empty()) {
            return Err(RangeParseError::Empty);
        }

        if disjuncts.len() == 1 {
            return RangeExpr::parse_single(&disjuncts[0]);
        }

        let mut parts = Vec::with_capacity(disjuncts.len());
        for disjunct in &disjuncts {
            if disjunct.is_empty() {
                return Err(RangeParseError::Unrecognized(s.trim().to_string()));
            }
            match RangeExpr::parse_single(disjunct)? {
                comparator @ RangeExpr::Comparator { .. } => parts.push(comparator),
                _ => return Err(RangeParseError::InvalidDisjunct(disjunct.clone())),
            }
        }

        Ok(RangeExpr::Or(parts))
    }
}

impl fmt::Display for RangeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeExpr::Interval { lo, hi } => write!(f, "{}-{}", lo, hi),
            RangeExpr::Comparator { op, bound } => write!(f, "{}{}", op.symbol(), bound),
            RangeExpr::Or(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
        }
    }
}

/// 参考数据中的范围定义：原始文本 + 一次性解析结果
///
/// 序列化时只保留原始文本，反序列化时重新解析，解析失败不报错。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RangeSpec {
    raw: String,
    parsed: Option<RangeExpr>,
}

impl RangeSpec {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = raw.parse::<RangeExpr>().ok();
        Self { raw, parsed }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn expr(&self) -> Option<&RangeExpr> {
        self.parsed.as_ref()
    }

    pub fn is_evaluable(&self) -> bool {
        self.parsed.is_some()
    }
}

impl From<String> for RangeSpec {
    fn from(raw: String) -> Self {
        RangeSpec::new(raw)
    }
}

impl From<RangeSpec> for String {
    fn from(spec: RangeSpec) -> Self {
        spec.raw
    }
}

impl From<&str> for RangeSpec {
    fn from(raw: &str) -> Self {
        RangeSpec::new(raw)
    }
}

/// 单个结果值的范围评估结论
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeFlags {
    pub abnormal: bool,
    pub critical: bool,
}

/// 参考范围描述正常区域，数值落在区域外即为异常
pub fn evaluate_abnormal(value: &ObservedValue, reference: Option<&RangeSpec>) -> bool {
    match (value.as_number(), reference.and_then(RangeSpec::expr)) {
        (Some(number), Some(expr)) => !expr.contains(number),
        _ => false,
    }
}

/// 危急值判断
///
/// 比较式（含 OR 组合）描述危险区域，满足即为危急；
/// 区间式 `L-H` 描述可接受窗口，落在窗口外即为危急。
pub fn evaluate_critical(value: &ObservedValue, critical: Option<&RangeSpec>) -> bool {
    match (value.as_number(), critical.and_then(RangeSpec::expr)) {
        (Some(number), Some(expr @ RangeExpr::Interval { .. })) => !expr.contains(number),
        (Some(number), Some(expr)) => expr.contains(number),
        _ => false,
    }
}

/// 同时评估异常与危急标志
pub fn evaluate(
    value: &ObservedValue,
    reference: Option<&RangeSpec>,
    critical: Option<&RangeSpec>,
) -> RangeFlags {
    RangeFlags {
        abnormal: evaluate_abnormal(value, reference),
        critical: evaluate_critical(value, critical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn num(n: f64) -> ObservedValue {
        ObservedValue::Number(n)
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "3.5-5.0".parse::<RangeExpr>().unwrap(),
            RangeExpr::Interval { lo: 3.5, hi: 5.0 }
        );
        assert_eq!(
            " 3.5 - 5.0 ".parse::<RangeExpr>().unwrap(),
            RangeExpr::Interval { lo: 3.5, hi: 5.0 }
        );
        assert_eq!(
            "-10--2".parse::<RangeExpr>().unwrap(),
            RangeExpr::Interval { lo: -10.0, hi: -2.0 }
        );
        assert_eq!(
            "<= 200".parse::<RangeExpr>().unwrap(),
            RangeExpr::Comparator { op: Comparison::Le, bound: 200.0 }
        );
        assert_eq!(
            "<2.5 OR >6.5".parse::<RangeExpr>().unwrap(),
            RangeExpr::Or(vec![
                RangeExpr::Comparator { op: Comparison::Lt, bound: 2.5 },
                RangeExpr::Comparator { op: Comparison::Gt, bound: 6.5 },
            ])
        );
        assert_eq!(
            "<2.5 || >6.5".parse::<RangeExpr>().unwrap(),
            "<2.5 or >6.5".parse::<RangeExpr>().unwrap()
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<RangeExpr>(), Err(RangeParseError::Empty));
        assert!(matches!(
            "normal".parse::<RangeExpr>(),
            Err(RangeParseError::Unrecognized(_))
        ));
        assert!(matches!(
            "5-1".parse::<RangeExpr>(),
            Err(RangeParseError::InvertedInterval { .. })
        ));
        assert!(matches!(
            "1-2 OR >5".parse::<RangeExpr>(),
            Err(RangeParseError::InvalidDisjunct(_))
        ));
        assert!(matches!(
            "<abc".parse::<RangeExpr>(),
            Err(RangeParseError::InvalidBound(_))
        ));
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let expr: RangeExpr = "<2.5 OR >6.5".parse().unwrap();
        assert_eq!(expr.to_string(), "<2.5 OR >6.5");
    }

    #[test]
    fn test_potassium_critical() {
        let critical = RangeSpec::new("<2.5 OR >6.5");
        let reference = RangeSpec::new("3.5-5.0");

        let flags = evaluate(&num(7.2), Some(&reference), Some(&critical));
        assert!(flags.abnormal);
        assert!(flags.critical);

        let flags = evaluate(&num(4.1), Some(&reference), Some(&critical));
        assert_eq!(flags, RangeFlags::default());

        let flags = evaluate(&num(5.8), Some(&reference), Some(&critical));
        assert!(flags.abnormal);
        assert!(!flags.critical);
    }

    #[test]
    fn test_interval_critical_window() {
        let critical = RangeSpec::new("2.5-6.5");
        assert!(evaluate_critical(&num(7.2), Some(&critical)));
        assert!(!evaluate_critical(&num(4.0), Some(&critical)));
    }

    #[test]
    fn test_comparator_reference_range() {
        let reference = RangeSpec::new("<200");
        assert!(!evaluate_abnormal(&num(180.0), Some(&reference)));
        assert!(evaluate_abnormal(&num(240.0), Some(&reference)));
    }

    #[test]
    fn test_cannot_evaluate() {
        let unparsable = RangeSpec::new("see comment");
        assert!(!unparsable.is_evaluable());
        assert!(!evaluate_abnormal(&num(100.0), Some(&unparsable)));
        assert!(!evaluate_critical(&num(100.0), Some(&unparsable)));
        assert!(!evaluate_abnormal(&num(100.0), None));

        let reference = RangeSpec::new("3.5-5.0");
        let positive = ObservedValue::parse("Positive");
        assert!(!evaluate_abnormal(&positive, Some(&reference)));
        let over_range = ObservedValue::parse(">1000");
        assert!(!evaluate_critical(&over_range, Some(&RangeSpec::new(">500"))));
    }

    #[test]
    fn test_range_spec_serde_keeps_raw_text() {
        let spec = RangeSpec::new("<2.5 OR >6.5");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"<2.5 OR >6.5\"");
        let back: RangeSpec = serde_json::from_str(&json).unwrap();
        assert!(back.is_evaluable());

        let broken: RangeSpec = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(broken.raw(), "pending");
        assert!(!broken.is_evaluable());
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic_and_total(raw_value in ".{0,12}", raw_expr in ".{0,24}") {
            let value = ObservedValue::parse(&raw_value);
            let spec = RangeSpec::new(raw_expr.clone());
            let first = evaluate(&value, Some(&spec), Some(&spec));
            let second = evaluate(&value, Some(&spec), Some(&spec));
            prop_assert_eq!(first, second);

            if !spec.is_evaluable() {
                prop_assert_eq!(first, RangeFlags::default());
            }
        }

        #[test]
        fn interval_members_are_never_abnormal(lo in -1000.0..1000.0f64, width in 0.0..500.0f64, t in 0.0..=1.0f64) {
            let hi = lo + width;
            let x = lo + width * t;
            let spec = RangeSpec::new(format!("{}-{}", lo, hi));
            prop_assume!(spec.is_evaluable());
            prop_assert!(!evaluate_abnormal(&ObservedValue::Number(x.clamp(lo, hi)), Some(&spec)));
        }
    }
}
