//! 通用工具函数

use chrono::NaiveDate;

/// 生成医嘱号：前缀 + yyyyMMdd + 4位日内序号
pub fn format_order_number(prefix: &str, day: NaiveDate, sequence: u32) -> String {
    format!("{}{}{:04}", prefix, day.format("%Y%m%d"), sequence)
}

/// 验证医嘱号格式
pub fn is_valid_order_number(prefix: &str, number: &str) -> bool {
    match number.strip_prefix(prefix) {
        Some(rest) => {
            rest.len() >= 12
                && rest.chars().all(|c| c.is_ascii_digit())
                && NaiveDate::parse_from_str(&rest[..8], "%Y%m%d").is_ok()
        }
        None => false,
    }
}
