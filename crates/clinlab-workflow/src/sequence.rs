//! 医嘱号生成

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use clinlab_core::utils::format_order_number;
use clinlab_core::Result;
use clinlab_database::OrderRepository;
use std::sync::Arc;

/// 医嘱号生成器
#[async_trait]
pub trait OrderNumberGenerator: Send + Sync {
    async fn next_number(&self) -> Result<String>;
}

/// 按日递增的医嘱号：前缀 + yyyyMMdd + 4位序号
///
/// 序号由仓储原子分配，并发开单不会重复。
pub struct DailyOrderNumberGenerator {
    repository: Arc<dyn OrderRepository>,
    prefix: String,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl DailyOrderNumberGenerator {
    pub fn new(repository: Arc<dyn OrderRepository>, prefix: impl Into<String>) -> Self {
        Self {
            repository,
            prefix: prefix.into(),
            today: utc_today,
        }
    }

    /// 固定日期，便于测试
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }
}

#[async_trait]
impl OrderNumberGenerator for DailyOrderNumberGenerator {
    async fn next_number(&self) -> Result<String> {
        let day = (self.today)();
        let sequence = self.repository.next_order_sequence(day).await?;
        Ok(format_order_number(&self.prefix, day, sequence))
    }
}
