//! 核心数据模型定义

use crate::range::{RangeFlags, RangeSpec};
use crate::value::ObservedValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 检验医嘱状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,        // 待提交
    Submitted,      // 已提交
    ResultsPending, // 部分结果已回报
    Completed,      // 全部完成
    Cancelled,      // 已取消
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::ResultsPending => "ResultsPending",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn all() -> [OrderStatus; 5] {
        [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::ResultsPending,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ]
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 医嘱优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderPriority {
    Stat,    // 急查
    Asap,    // 尽快
    Routine, // 常规
}

impl Default for OrderPriority {
    fn default() -> Self {
        OrderPriority::Routine
    }
}

/// 审批状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ApprovalStatus::NotRequired => "NotRequired",
            ApprovalStatus::Pending => "Pending",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Rejected => "Rejected",
        };
        f.write_str(text)
    }
}

/// 医嘱明细状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderItemStatus {
    Pending,
    Submitted,
    Resulted,
    Cancelled,
}

/// 检验结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    PendingReview, // 待审核
    Reviewed,      // 已审核
}

/// 趋势指示
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendIndicator {
    Up,
    Down,
    Stable,
    Unknown,
}

impl Default for TrendIndicator {
    fn default() -> Self {
        TrendIndicator::Unknown
    }
}

/// 警报级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertSeverity {
    Informational,
    Warning,
    High,
}

/// 警报挂载对象
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertTarget {
    Order(Uuid),
    Result(Uuid),
}

/// 常用警报类型
pub mod alert_types {
    pub const CRITICAL_VALUE: &str = "CriticalValue";
    pub const CLINICAL_FINDING: &str = "ClinicalFinding";
    pub const EXTERNAL_CANCELLATION: &str = "ExternalCancellation";
}

/// 标本信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpecimenInfo {
    pub specimen_type: Option<String>,     // 标本类型
    pub collection_site: Option<String>,   // 采集部位
    pub collection_method: Option<String>, // 采集方式
}

/// 检验医嘱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String, // LAB + yyyyMMdd + 4位序号
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub encounter_id: Option<Uuid>,
    pub order_date: DateTime<Utc>,
    pub collection_date: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub priority: OrderPriority,
    pub clinical_notes: Option<String>,
    pub diagnosis_codes: Vec<String>,
    pub is_fasting: bool,
    pub specimen: SpecimenInfo,
    pub external_lab_id: Option<Uuid>,
    pub external_order_id: Option<String>,
    pub requires_approval: bool,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<Uuid>,
    pub approval_date: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub authorization_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub items: Vec<OrderItem>,
    pub documents: Vec<Document>,
    pub version: i64, // 乐观锁版本号
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: Uuid) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    pub fn is_external(&self) -> bool {
        self.external_lab_id.is_some()
    }

    /// 所有未取消的明细都已有结果
    pub fn all_items_resulted(&self) -> bool {
        self.items
            .iter()
            .filter(|item| item.status != OrderItemStatus::Cancelled)
            .all(|item| item.status == OrderItemStatus::Resulted)
    }

    pub fn has_results(&self) -> bool {
        self.items.iter().any(|item| item.result_status.is_some())
    }
}

/// 医嘱明细（一个检验项目）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub test_id: Uuid,
    pub status: OrderItemStatus,
    pub priority: OrderPriority,
    pub special_instructions: Option<String>,
    pub is_abnormal: bool, // 由结果汇总得出
    pub is_critical: bool, // 由结果汇总得出
    pub result_status: Option<ResultStatus>,
}

/// 检验项目（参考数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTest {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub category: String,
    pub department: Option<String>,
    pub specimen_type: Option<String>,
    pub requires_fasting: bool,
    pub reference_range: Option<RangeSpec>,
    pub critical_range: Option<RangeSpec>,
    pub units: Option<String>,
    pub is_active: bool,
    pub components: Vec<TestComponent>,
}

impl LabTest {
    pub fn component(&self, component_id: Uuid) -> Option<&TestComponent> {
        self.components.iter().find(|c| c.id == component_id)
    }

    pub fn component_by_code(&self, code: &str) -> Option<&TestComponent> {
        self.components
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }
}

/// 检验组分（子项）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestComponent {
    pub id: Uuid,
    pub test_id: Uuid,
    pub code: String,
    pub name: String,
    pub units: Option<String>,
    pub reference_range: Option<RangeSpec>,
    pub critical_range: Option<RangeSpec>,
    pub display_order: i32,
    pub is_required: bool,
    /// 计算项公式，仅保存不求值
    pub calculation_formula: Option<String>,
    /// 趋势判断的稳定容差，默认 0 表示精确相等
    #[serde(default)]
    pub trend_tolerance: f64,
}

impl TestComponent {
    /// 组分自身的范围优先，缺失时回退到项目级范围
    pub fn resolved_reference<'a>(&'a self, test: &'a LabTest) -> Option<&'a RangeSpec> {
        self.reference_range
            .as_ref()
            .or(test.reference_range.as_ref())
    }

    pub fn resolved_critical<'a>(&'a self, test: &'a LabTest) -> Option<&'a RangeSpec> {
        self.critical_range.as_ref().or(test.critical_range.as_ref())
    }

    pub fn is_calculated(&self) -> bool {
        self.calculation_formula.is_some()
    }
}

/// 外部检验机构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLab {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub is_active: bool,
}

/// 附件文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub handle: String, // 文档存储返回的路径/句柄
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// 单个组分的结果值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultValue {
    pub id: Uuid,
    pub component_id: Uuid,
    pub component_code: String,
    pub raw_value: String,
    pub value: ObservedValue,
    pub units: Option<String>,
    pub reference_range: Option<String>, // 评估时的范围快照
    pub critical_range: Option<String>,
    pub is_abnormal: bool,
    pub is_critical: bool,
    pub previous_value: Option<String>,
    pub previous_date: Option<DateTime<Utc>>,
    pub trend: TrendIndicator,
}

impl ResultValue {
    pub fn new(component: &TestComponent, raw_value: impl Into<String>, units: Option<String>) -> Self {
        let raw_value = raw_value.into();
        Self {
            id: Uuid::new_v4(),
            component_id: component.id,
            component_code: component.code.clone(),
            value: ObservedValue::parse(&raw_value),
            raw_value,
            units: units.or_else(|| component.units.clone()),
            reference_range: None,
            critical_range: None,
            is_abnormal: false,
            is_critical: false,
            previous_value: None,
            previous_date: None,
            trend: TrendIndicator::Unknown,
        }
    }

    /// 记录评估结论以及当时使用的范围文本
    pub fn apply_ranges(
        &mut self,
        reference: Option<&RangeSpec>,
        critical: Option<&RangeSpec>,
        flags: RangeFlags,
    ) {
        self.reference_range = reference.map(|r| r.raw().to_string());
        self.critical_range = critical.map(|r| r.raw().to_string());
        self.is_abnormal = flags.abnormal;
        self.is_critical = flags.critical;
    }
}

/// 检验结果
///
/// 结果值与汇总标志只能通过方法修改，每次修改后重新汇总，
/// 保证 `is_critical()` 恰好等于"至少一个结果值为危急"。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredLabResult")]
pub struct LabResult {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub patient_id: Uuid,
    pub result_date: DateTime<Utc>,
    pub status: ResultStatus,
    pub performing_lab: Option<String>,
    pub technician: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub review_date: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub repeat_required: bool,
    pub source_message_id: Option<String>, // 接口消息ID，用于去重
    pub documents: Vec<Document>,
    pub version: i64,
    values: Vec<ResultValue>,
    is_abnormal: bool,
    is_critical: bool,
}

/// 反序列化中间形态，汇总标志总是重新计算
#[derive(Deserialize)]
struct StoredLabResult {
    id: Uuid,
    order_id: Uuid,
    order_item_id: Uuid,
    patient_id: Uuid,
    result_date: DateTime<Utc>,
    status: ResultStatus,
    performing_lab: Option<String>,
    technician: Option<String>,
    reviewed_by: Option<Uuid>,
    review_date: Option<DateTime<Utc>>,
    comments: Option<String>,
    #[serde(default)]
    repeat_required: bool,
    source_message_id: Option<String>,
    #[serde(default)]
    documents: Vec<Document>,
    version: i64,
    values: Vec<ResultValue>,
}

impl From<StoredLabResult> for LabResult {
    fn from(stored: StoredLabResult) -> Self {
        let mut result = LabResult {
            id: stored.id,
            order_id: stored.order_id,
            order_item_id: stored.order_item_id,
            patient_id: stored.patient_id,
            result_date: stored.result_date,
            status: stored.status,
            performing_lab: stored.performing_lab,
            technician: stored.technician,
            reviewed_by: stored.reviewed_by,
            review_date: stored.review_date,
            comments: stored.comments,
            repeat_required: stored.repeat_required,
            source_message_id: stored.source_message_id,
            documents: stored.documents,
            version: stored.version,
            values: stored.values,
            is_abnormal: false,
            is_critical: false,
        };
        result.refresh_flags();
        result
    }
}

impl LabResult {
    pub fn new(order_id: Uuid, order_item_id: Uuid, patient_id: Uuid, result_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            order_item_id,
            patient_id,
            result_date,
            status: ResultStatus::PendingReview,
            performing_lab: None,
            technician: None,
            reviewed_by: None,
            review_date: None,
            comments: None,
            repeat_required: false,
            source_message_id: None,
            documents: Vec::new(),
            version: 0,
            values: Vec::new(),
            is_abnormal: false,
            is_critical: false,
        }
    }

    pub fn values(&self) -> &[ResultValue] {
        &self.values
    }

    pub fn is_abnormal(&self) -> bool {
        self.is_abnormal
    }

    pub fn is_critical(&self) -> bool {
        self.is_critical
    }

    pub fn critical_values(&self) -> impl Iterator<Item = &ResultValue> {
        self.values.iter().filter(|v| v.is_critical)
    }

    /// 添加结果值；同一组分已存在时替换并返回旧值
    pub fn upsert_value(&mut self, value: ResultValue) -> Option<ResultValue> {
        let previous = match self
            .values
            .iter_mut()
            .find(|v| v.component_id == value.component_id)
        {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.values.push(value);
                None
            }
        };
        self.refresh_flags();
        previous
    }

    pub fn remove_value(&mut self, component_id: Uuid) -> Option<ResultValue> {
        let index = self.values.iter().position(|v| v.component_id == component_id)?;
        let removed = self.values.remove(index);
        self.refresh_flags();
        Some(removed)
    }

    pub fn mark_reviewed(&mut self, reviewer: Uuid, at: DateTime<Utc>) {
        self.reviewed_by = Some(reviewer);
        self.review_date = Some(at);
        self.status = ResultStatus::Reviewed;
    }

    fn refresh_flags(&mut self) {
        self.is_abnormal = self.values.iter().any(|v| v.is_abnormal);
        self.is_critical = self.values.iter().any(|v| v.is_critical);
    }
}

/// 警报（医嘱警报/结果警报）
///
/// 只追加不修改，确认是唯一的变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub target: AlertTarget,
    pub order_id: Uuid,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        target: AlertTarget,
        order_id: Uuid,
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            order_id,
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            created_at: Utc::now(),
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    pub fn is_critical_value(&self) -> bool {
        self.severity == AlertSeverity::High && self.alert_type == alert_types::CRITICAL_VALUE
    }

    /// 已确认的警报保持不变，返回 false
    pub fn acknowledge(&mut self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        if self.is_acknowledged() {
            return false;
        }
        self.acknowledged_by = Some(user_id);
        self.acknowledged_at = Some(at);
        true
    }
}

/// 通知接收方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Recipient {
    Provider(Uuid),
    LabStaff,
    Supervisor,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Provider(id) => write!(f, "provider:{}", id),
            Recipient::LabStaff => f.write_str("lab_staff"),
            Recipient::Supervisor => f.write_str("supervisor"),
        }
    }
}

/// 投递通道
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryChannel {
    Primary,
    Fallback,
    Escalation,
}

/// 一次投递尝试的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub recipient: Recipient,
    pub channel: DeliveryChannel,
    pub delivered: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn delivered(alert_id: Uuid, recipient: Recipient, channel: DeliveryChannel) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            recipient,
            channel,
            delivered: true,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failed(
        alert_id: Uuid,
        recipient: Recipient,
        channel: DeliveryChannel,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            recipient,
            channel,
            delivered: false,
            error: Some(error.into()),
            attempted_at: Utc::now(),
        }
    }
}

/// 警报投递状态，由投递记录推导
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertDeliveryStatus {
    Delivered,  // 所有接收方经主通道送达
    Escalated,  // 至少一个接收方经备用通道送达
    Unresolved, // 至少一个接收方未送达
}

impl AlertDeliveryStatus {
    /// 按接收方汇总：任一接收方没有成功投递即为未解决
    pub fn derive(records: &[NotificationRecord]) -> AlertDeliveryStatus {
        let mut recipients: Vec<Recipient> = Vec::new();
        for record in records {
            if !recipients.contains(&record.recipient) {
                recipients.push(record.recipient);
            }
        }

        let mut escalated = false;
        for recipient in recipients {
            let delivered: Vec<&NotificationRecord> = records
                .iter()
                .filter(|r| r.recipient == recipient && r.delivered)
                .collect();
            if delivered.is_empty() {
                return AlertDeliveryStatus::Unresolved;
            }
            if delivered.iter().all(|r| r.channel != DeliveryChannel::Primary) {
                escalated = true;
            }
        }

        if escalated {
            AlertDeliveryStatus::Escalated
        } else {
            AlertDeliveryStatus::Delivered
        }
    }
}

/// 创建医嘱请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRequest {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub encounter_id: Option<Uuid>,
    pub priority: OrderPriority,
    pub tests: Vec<OrderItemRequest>,
    pub is_fasting: bool,
    pub clinical_notes: Option<String>,
    pub diagnosis_codes: Vec<String>,
    pub specimen: SpecimenInfo,
    pub external_lab_id: Option<Uuid>,
    pub requires_approval: bool,
    pub documents: Vec<DocumentRequest>,
}

/// 医嘱明细请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub test_id: Uuid,
    pub priority: Option<OrderPriority>,
    pub special_instructions: Option<String>,
}

impl OrderItemRequest {
    pub fn new(test_id: Uuid) -> Self {
        Self {
            test_id,
            priority: None,
            special_instructions: None,
        }
    }
}

/// 上传文档请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// 录入结果请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultRequest {
    pub order_item_id: Uuid,
    pub performing_lab: Option<String>,
    pub technician: Option<String>,
    pub comments: Option<String>,
    pub result_date: Option<DateTime<Utc>>,
    pub values: Vec<ResultValueRequest>,
    pub documents: Vec<DocumentRequest>,
    pub source_message_id: Option<String>,
}

/// 单个组分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultValueRequest {
    pub component_id: Uuid,
    pub raw_value: String,
    pub units: Option<String>,
}

impl ResultValueRequest {
    pub fn new(component_id: Uuid, raw_value: impl Into<String>) -> Self {
        Self {
            component_id,
            raw_value: raw_value.into(),
            units: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn component(code: &str) -> TestComponent {
        TestComponent {
            id: Uuid::new_v4(),
            test_id: Uuid::new_v4(),
            code: code.into(),
            name: code.into(),
            units: Some("mmol/L".into()),
            reference_range: None,
            critical_range: None,
            display_order: 0,
            is_required: true,
            calculation_formula: None,
            trend_tolerance: 0.0,
        }
    }

    fn value(critical: bool, abnormal: bool) -> ResultValue {
        let mut v = ResultValue::new(&component("K"), "4.0", None);
        v.is_critical = critical;
        v.is_abnormal = abnormal;
        v
    }

    fn new_result() -> LabResult {
        LabResult::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_component_range_overrides_test_range() {
        let mut comp = component("GLU");
        let test = LabTest {
            id: comp.test_id,
            code: "BMP".into(),
            name: "Basic Metabolic Panel".into(),
            category: "Chemistry".into(),
            department: None,
            specimen_type: Some("Serum".into()),
            requires_fasting: true,
            reference_range: Some(RangeSpec::new("70-99")),
            critical_range: Some(RangeSpec::new("<40 OR >500")),
            units: None,
            is_active: true,
            components: vec![],
        };
        assert_eq!(comp.resolved_reference(&test).map(|r| r.raw()), Some("70-99"));

        comp.reference_range = Some(RangeSpec::new("60-110"));
        assert_eq!(comp.resolved_reference(&test).map(|r| r.raw()), Some("60-110"));
        assert_eq!(comp.resolved_critical(&test).map(|r| r.raw()), Some("<40 OR >500"));
    }

    #[test]
    fn test_result_flags_follow_values() {
        let mut result = new_result();
        assert!(!result.is_critical());

        let critical = value(true, true);
        let component_id = critical.component_id;
        result.upsert_value(critical);
        result.upsert_value(value(false, false));
        assert!(result.is_critical());
        assert!(result.is_abnormal());

        result.remove_value(component_id);
        assert!(!result.is_critical());
        assert!(!result.is_abnormal());
    }

    #[test]
    fn test_flags_recomputed_after_deserialize() {
        let mut result = new_result();
        result.upsert_value(value(true, true));
        let mut json = serde_json::to_value(&result).unwrap();
        json["is_critical"] = serde_json::Value::Bool(false);

        let back: LabResult = serde_json::from_value(json).unwrap();
        assert!(back.is_critical());
    }

    #[test]
    fn test_alert_acknowledge_is_idempotent() {
        let mut alert = Alert::new(
            AlertTarget::Order(Uuid::new_v4()),
            Uuid::new_v4(),
            alert_types::CRITICAL_VALUE,
            AlertSeverity::High,
            "K 7.2",
        );
        let first = Uuid::new_v4();
        let at = Utc::now();
        assert!(alert.acknowledge(first, at));
        assert!(!alert.acknowledge(Uuid::new_v4(), Utc::now()));
        assert_eq!(alert.acknowledged_by, Some(first));
        assert_eq!(alert.acknowledged_at, Some(at));
    }

    #[test]
    fn test_delivery_status_derivation() {
        let alert_id = Uuid::new_v4();
        let provider = Recipient::Provider(Uuid::new_v4());

        let records = vec![
            NotificationRecord::delivered(alert_id, provider, DeliveryChannel::Primary),
            NotificationRecord::delivered(alert_id, Recipient::Supervisor, DeliveryChannel::Primary),
        ];
        assert_eq!(AlertDeliveryStatus::derive(&records), AlertDeliveryStatus::Delivered);

        let records = vec![
            NotificationRecord::delivered(alert_id, provider, DeliveryChannel::Primary),
            NotificationRecord::failed(alert_id, Recipient::Supervisor, DeliveryChannel::Primary, "timeout"),
            NotificationRecord::delivered(alert_id, Recipient::Supervisor, DeliveryChannel::Fallback),
        ];
        assert_eq!(AlertDeliveryStatus::derive(&records), AlertDeliveryStatus::Escalated);

        let records = vec![
            NotificationRecord::failed(alert_id, provider, DeliveryChannel::Primary, "503"),
            NotificationRecord::failed(alert_id, provider, DeliveryChannel::Fallback, "503"),
            NotificationRecord::delivered(alert_id, Recipient::Supervisor, DeliveryChannel::Primary),
        ];
        assert_eq!(AlertDeliveryStatus::derive(&records), AlertDeliveryStatus::Unresolved);
    }

    #[test]
    fn test_all_items_resulted_ignores_cancelled() {
        let order_id = Uuid::new_v4();
        let item = |status| OrderItem {
            id: Uuid::new_v4(),
            order_id,
            test_id: Uuid::new_v4(),
            status,
            priority: OrderPriority::Routine,
            special_instructions: None,
            is_abnormal: false,
            is_critical: false,
            result_status: None,
        };
        let now = Utc::now();
        let mut order = Order {
            id: order_id,
            order_number: "LAB202401010001".into(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            encounter_id: None,
            order_date: now,
            collection_date: None,
            status: OrderStatus::Submitted,
            priority: OrderPriority::Routine,
            clinical_notes: None,
            diagnosis_codes: vec![],
            is_fasting: false,
            specimen: SpecimenInfo::default(),
            external_lab_id: None,
            external_order_id: None,
            requires_approval: false,
            approval_status: ApprovalStatus::NotRequired,
            approved_by: None,
            approval_date: None,
            approval_notes: None,
            authorization_number: None,
            cancellation_reason: None,
            items: vec![item(OrderItemStatus::Resulted), item(OrderItemStatus::Cancelled)],
            documents: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        };
        assert!(order.all_items_resulted());
        order.items.push(item(OrderItemStatus::Submitted));
        assert!(!order.all_items_resulted());
    }

    proptest! {
        #[test]
        fn critical_flag_tracks_any_critical_value(flags in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..8), removals in 0usize..4) {
            let mut result = new_result();
            let mut ids = Vec::new();
            for (critical, abnormal) in &flags {
                let v = value(*critical, *abnormal);
                ids.push(v.component_id);
                result.upsert_value(v);
                prop_assert_eq!(result.is_critical(), result.values().iter().any(|v| v.is_critical));
            }
            for id in ids.iter().take(removals) {
                result.remove_value(*id);
                prop_assert_eq!(result.is_critical(), result.values().iter().any(|v| v.is_critical));
                prop_assert_eq!(result.is_abnormal(), result.values().iter().any(|v| v.is_abnormal));
            }
        }
    }
}
