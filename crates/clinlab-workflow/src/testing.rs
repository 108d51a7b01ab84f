//! 单元测试用的协作方替身

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clinlab_core::{AlertSeverity, LabResult, Order, OrderRequest, Recipient};
use clinlab_integration::{
    ClinicalFinding, ClinicalRecord, ClinicalValidation, GatewayOrder, GatewayReceipt, LabGateway,
    Notification, NotificationDispatcher, NotificationKind, Urgency, Verdict,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// 记录每次投递的通知分发器，可按接收方注入失败
#[derive(Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<(Recipient, NotificationKind, Urgency)>>,
    fail_providers: AtomicBool,
    fail_supervisor: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_providers(&self, fail: bool) {
        self.fail_providers.store(fail, Ordering::SeqCst);
    }

    pub fn fail_supervisor(&self, fail: bool) {
        self.fail_supervisor.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn delivered_to(&self, recipient: Recipient) -> usize {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(r, _, _)| *r == recipient)
            .count()
    }

    pub async fn delivered_kind(&self, kind: NotificationKind) -> Vec<(Recipient, Urgency)> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(r, _, u)| (*r, *u))
            .collect()
    }

    async fn record(&self, recipient: Recipient, notification: &Notification, fail: bool) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if fail {
            return Err(anyhow!("{} unreachable", recipient));
        }
        self.delivered
            .lock()
            .await
            .push((recipient, notification.kind, notification.urgency));
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify_provider(&self, provider_id: Uuid, notification: &Notification) -> Result<()> {
        let fail = self.fail_providers.load(Ordering::SeqCst);
        self.record(Recipient::Provider(provider_id), notification, fail).await
    }

    async fn notify_lab_staff(&self, notification: &Notification) -> Result<()> {
        self.record(Recipient::LabStaff, notification, false).await
    }

    async fn notify_supervisor(&self, notification: &Notification) -> Result<()> {
        let fail = self.fail_supervisor.load(Ordering::SeqCst);
        self.record(Recipient::Supervisor, notification, fail).await
    }
}

/// 可注入失败与超时的外部机构接口
#[derive(Default)]
pub struct FakeGateway {
    pub sent: Mutex<Vec<GatewayOrder>>,
    pub acknowledged: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    fail_send: AtomicBool,
    hang: AtomicBool,
    fail_cancel: AtomicBool,
    fail_ack: AtomicBool,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ack(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LabGateway for FakeGateway {
    async fn send_order(&self, order: &GatewayOrder) -> Result<GatewayReceipt> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().await.push(order.clone());
        Ok(GatewayReceipt {
            external_order_id: format!("EXT-{}", n),
            message: None,
        })
    }

    async fn acknowledge_result(&self, message_id: &str) -> Result<()> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(anyhow!("ack endpoint down"));
        }
        self.acknowledged.lock().await.push(message_id.to_string());
        Ok(())
    }

    async fn cancel_order(&self, external_order_id: &str, _reason: &str) -> Result<()> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(anyhow!("cancellation rejected"));
        }
        self.cancelled.lock().await.push(external_order_id.to_string());
        Ok(())
    }
}

/// 可配置结论的临床服务
#[derive(Default)]
pub struct ScriptedClinical {
    pub rejection: Mutex<Option<String>>,
    pub requires_authorization: AtomicBool,
    pub findings: Mutex<Vec<ClinicalFinding>>,
    pub updated: Mutex<Vec<Uuid>>,
}

impl ScriptedClinical {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject_with(&self, reason: &str) {
        *self.rejection.lock().await = Some(reason.to_string());
    }

    pub async fn add_finding(&self, severity: AlertSeverity, message: &str) {
        self.findings.lock().await.push(ClinicalFinding {
            severity,
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl ClinicalValidation for ScriptedClinical {
    async fn validate_order(&self, _request: &OrderRequest) -> Result<Verdict> {
        Ok(match self.rejection.lock().await.clone() {
            Some(reason) => Verdict::Rejected(reason),
            None => Verdict::Accepted,
        })
    }

    async fn requires_authorization(&self, _order: &Order) -> Result<bool> {
        Ok(self.requires_authorization.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ClinicalRecord for ScriptedClinical {
    async fn update_lab_results(&self, _patient_id: Uuid, result: &LabResult) -> Result<()> {
        self.updated.lock().await.push(result.id);
        Ok(())
    }

    async fn evaluate_result(&self, _patient_id: Uuid, _result: &LabResult) -> Result<Vec<ClinicalFinding>> {
        Ok(self.findings.lock().await.clone())
    }
}
