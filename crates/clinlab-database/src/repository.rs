//! 医嘱仓储接口

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinlab_core::{
    Alert, ExternalLab, LabResult, LabTest, NotificationRecord, ObservedValue, Order, OrderStatus,
    Result, ResultStatus,
};
use uuid::Uuid;

/// 患者某组分的历史结果值，用于趋势判断
#[derive(Debug, Clone, PartialEq)]
pub struct PriorValue {
    pub raw_value: String,
    pub value: ObservedValue,
    pub result_date: DateTime<Utc>,
}

/// 医嘱、结果与警报的持久化
///
/// `update_order` / `update_result` 采用乐观锁：传入实体的 `version` 必须与存储中的一致，
/// 成功后存储版本加一并返回新版本；不一致时返回 `ClinlabError::Concurrency`。
#[async_trait]
pub trait OrderRepository: Send + Sync {
    // ========== 参考数据 ==========

    async fn upsert_test(&self, test: &LabTest) -> Result<()>;

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>>;

    async fn upsert_external_lab(&self, lab: &ExternalLab) -> Result<()>;

    async fn get_external_lab(&self, id: Uuid) -> Result<Option<ExternalLab>>;

    // ========== 医嘱 ==========

    /// 原子地取得某日的下一个序号（从 1 开始）
    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32>;

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn find_order_by_item(&self, item_id: Uuid) -> Result<Option<Order>>;

    async fn find_order_by_external_id(&self, external_order_id: &str) -> Result<Option<Order>>;

    async fn update_order(&self, order: &Order) -> Result<i64>;

    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    // ========== 结果 ==========

    async fn insert_result(&self, result: &LabResult) -> Result<()>;

    /// 在同一次提交中写入结果并按乐观锁更新所属医嘱，返回医嘱新版本
    ///
    /// 医嘱版本不一致时两者都不写入。
    async fn record_result(&self, order: &Order, result: &LabResult) -> Result<i64>;

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>>;

    async fn update_result(&self, result: &LabResult) -> Result<i64>;

    async fn results_for_order(&self, order_id: Uuid) -> Result<Vec<LabResult>>;

    async fn find_result_by_message_id(&self, message_id: &str) -> Result<Option<LabResult>>;

    async fn results_by_status(&self, status: ResultStatus) -> Result<Vec<LabResult>>;

    /// 患者在 `before` 之前最近一次该组分的结果值，与医嘱无关
    async fn latest_value_before(
        &self,
        patient_id: Uuid,
        component_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<PriorValue>>;

    // ========== 警报 ==========

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>>;

    /// 确认警报；已确认的警报原样返回
    async fn acknowledge_alert(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<Alert>;

    async fn unacknowledged_alerts(&self) -> Result<Vec<Alert>>;

    async fn alerts_for_order(&self, order_id: Uuid) -> Result<Vec<Alert>>;

    async fn append_notification(&self, record: &NotificationRecord) -> Result<()>;

    async fn notification_records(&self, alert_id: Uuid) -> Result<Vec<NotificationRecord>>;
}
