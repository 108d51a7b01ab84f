//! 趋势分析
//!
//! 与患者同一组分最近一次历史结果比较，得出变化方向。

use chrono::{DateTime, Utc};
use clinlab_core::{ObservedValue, Result, ResultValue, TestComponent, TrendIndicator};
use clinlab_database::OrderRepository;
use std::sync::Arc;
use uuid::Uuid;

/// 计算趋势；差值绝对值不超过 `tolerance` 视为稳定
pub fn compute_trend(
    current: &ObservedValue,
    previous: Option<&ObservedValue>,
    tolerance: f64,
) -> TrendIndicator {
    let (Some(current), Some(previous)) = (current.as_number(), previous.and_then(|p| p.as_number()))
    else {
        return TrendIndicator::Unknown;
    };

    let delta = current - previous;
    if delta.abs() <= tolerance.max(0.0) {
        TrendIndicator::Stable
    } else if delta > 0.0 {
        TrendIndicator::Up
    } else {
        TrendIndicator::Down
    }
}

/// 趋势分析器
pub struct TrendAnalyzer {
    repository: Arc<dyn OrderRepository>,
}

impl TrendAnalyzer {
    pub fn new(repository: Arc<dyn OrderRepository>) -> Self {
        Self { repository }
    }

    /// 按结果时间查找历史值并写入趋势信息
    ///
    /// 历史值按结果时间排序，不看所属医嘱。
    pub async fn annotate(
        &self,
        patient_id: Uuid,
        result_date: DateTime<Utc>,
        component: &TestComponent,
        value: &mut ResultValue,
    ) -> Result<()> {
        let prior = self
            .repository
            .latest_value_before(patient_id, component.id, result_date)
            .await?;

        value.trend = compute_trend(
            &value.value,
            prior.as_ref().map(|p| &p.value),
            component.trend_tolerance,
        );

        if let Some(prior) = prior {
            value.previous_value = Some(prior.raw_value);
            value.previous_date = Some(prior.result_date);
        }

        Ok(())
    }
}
