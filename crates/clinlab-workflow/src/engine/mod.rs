//! 医嘱生命周期管理
//!
//! 编排开单、提交、结果录入、审核、取消与接口结果接收。
//! 所有写操作通过仓储的版本检查串行化；外部接口调用均有超时。

mod orders;
mod results;


use crate::alerting::{AlertDispatcher, RaisedAlert};
use crate::metrics::EngineMetrics;
use crate::routing::DepartmentRouter;
use crate::sequence::{DailyOrderNumberGenerator, OrderNumberGenerator};
use crate::settings::EngineSettings;
use crate::state_machine::OrderStateMachine;
use crate::trend::TrendAnalyzer;
use crate::worklist::{LabWorkQueue, WorkItem, WorkQueueStats, Worksheet};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clinlab_core::{
    Alert, AlertDeliveryStatus, AlertSeverity, AlertTarget, ClinlabError, Document, DocumentRequest,
    ErrorKind, LabResult, LabTest, Order, OrderStatus, Recipient, Result, ResultStatus,
};
use clinlab_database::OrderRepository;
use clinlab_integration::{
    ClinicalRecord, ClinicalValidation, DocumentStore, IdentityDirectory, LabGateway, Notification,
    NotificationDispatcher, NotificationKind, NotificationQueue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub use results::{BatchItemError, BatchOutcome, ResultRecording};

/// 引擎依赖的外部协作方
pub struct Collaborators {
    pub repository: Arc<dyn OrderRepository>,
    pub identity: Arc<dyn IdentityDirectory>,
    pub clinical_validation: Arc<dyn ClinicalValidation>,
    pub clinical_record: Arc<dyn ClinicalRecord>,
    pub gateway: Arc<dyn LabGateway>,
    pub documents: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    /// 危急警报主通道失败时使用
    pub fallback_notifier: Option<Arc<dyn NotificationDispatcher>>,
    /// 未指定时按日递增
    pub order_numbers: Option<Arc<dyn OrderNumberGenerator>>,
}

/// 系统概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemOverview {
    pub orders_by_status: BTreeMap<String, usize>,
    pub unacknowledged_alerts: usize,
    pub unresolved_critical_alerts: usize,
    pub work_queue: WorkQueueStats,
    pub generated_at: DateTime<Utc>,
}

/// 医嘱生命周期管理器
pub struct OrderLifecycleManager {
    repository: Arc<dyn OrderRepository>,
    identity: Arc<dyn IdentityDirectory>,
    clinical_validation: Arc<dyn ClinicalValidation>,
    clinical_record: Arc<dyn ClinicalRecord>,
    gateway: Arc<dyn LabGateway>,
    documents: Arc<dyn DocumentStore>,
    order_numbers: Arc<dyn OrderNumberGenerator>,
    alerts: AlertDispatcher,
    state_machine: OrderStateMachine,
    router: DepartmentRouter,
    work_queue: RwLock<LabWorkQueue>,
    trend: TrendAnalyzer,
    metrics: EngineMetrics,
    settings: EngineSettings,
}

impl OrderLifecycleManager {
    /// 创建管理器并启动通知工作池，需要在 tokio 运行时内调用
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Result<Self> {
        let metrics = EngineMetrics::new().map_err(|e| ClinlabError::Internal(e.to_string()))?;
        let repository = collaborators.repository;

        let queue = NotificationQueue::start(collaborators.notifier.clone(), settings.notification_queue.clone());
        let alerts = AlertDispatcher::new(
            repository.clone(),
            collaborators.notifier,
            collaborators.fallback_notifier,
            queue,
            settings.notification_timeout,
            metrics.clone(),
        );

        let order_numbers = collaborators.order_numbers.unwrap_or_else(|| {
            Arc::new(DailyOrderNumberGenerator::new(
                repository.clone(),
                settings.order_prefix.clone(),
            ))
        });

        Ok(Self {
            trend: TrendAnalyzer::new(repository.clone()),
            repository,
            identity: collaborators.identity,
            clinical_validation: collaborators.clinical_validation,
            clinical_record: collaborators.clinical_record,
            gateway: collaborators.gateway,
            documents: collaborators.documents,
            order_numbers,
            alerts,
            state_machine: OrderStateMachine::new(),
            router: DepartmentRouter::with_default_rules(),
            work_queue: RwLock::new(LabWorkQueue::new()),
            metrics,
            settings,
        })
    }

    /// 替换院内科室路由规则
    pub fn with_router(mut self, router: DepartmentRouter) -> Self {
        self.router = router;
        self
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.load_order(order_id).await
    }

    pub async fn get_result(&self, result_id: Uuid) -> Result<LabResult> {
        self.repository
            .get_result(result_id)
            .await?
            .ok_or_else(|| ClinlabError::NotFound(format!("result {}", result_id)))
    }

    pub async fn results_for_order(&self, order_id: Uuid) -> Result<Vec<LabResult>> {
        self.repository.results_for_order(order_id).await
    }

    pub async fn alerts_for_order(&self, order_id: Uuid) -> Result<Vec<Alert>> {
        self.repository.alerts_for_order(order_id).await
    }

    /// 手工创建医嘱警报；高危警报走紧急通道
    ///
    /// 排队投递的警报返回 `Delivered`，表示已交给通知队列。
    pub async fn create_order_alert(
        &self,
        order_id: Uuid,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
    ) -> Result<RaisedAlert> {
        let order = self.load_order(order_id).await?;
        let alert = Alert::new(AlertTarget::Order(order.id), order.id, alert_type, severity, message);
        let notification = Notification::new(
            NotificationKind::OrderAlert,
            order.id,
            order.order_number.clone(),
            format!("{} alert on order {}", alert_type, order.order_number),
            message,
        );

        if severity == AlertSeverity::High {
            self.alerts.raise_urgent(alert, order.provider_id, notification).await
        } else {
            let alert = self.alerts.raise_queued(alert, order.provider_id, notification).await?;
            Ok(RaisedAlert {
                alert,
                delivery: AlertDeliveryStatus::Delivered,
            })
        }
    }

    /// 确认警报，已确认的警报原样返回
    pub async fn acknowledge_alert(&self, alert_id: Uuid, user_id: Uuid) -> Result<Alert> {
        let alert = self.repository.acknowledge_alert(alert_id, user_id, Utc::now()).await?;
        info!(
            target: "audit",
            %alert_id,
            %user_id,
            order_id = %alert.order_id,
            "Alert acknowledged"
        );
        Ok(alert)
    }

    /// 待审核结果
    pub async fn pending_results(&self) -> Result<Vec<LabResult>> {
        self.repository.results_by_status(ResultStatus::PendingReview).await
    }

    /// 未确认警报
    pub async fn pending_alerts(&self) -> Result<Vec<Alert>> {
        self.repository.unacknowledged_alerts().await
    }

    /// 未确认且至少一个接收方未送达的高危警报
    pub async fn unresolved_critical_alerts(&self) -> Result<Vec<Alert>> {
        let mut unresolved = Vec::new();
        for alert in self.repository.unacknowledged_alerts().await? {
            if alert.severity != AlertSeverity::High {
                continue;
            }
            if self.alerts.delivery_status(alert.id).await? == AlertDeliveryStatus::Unresolved {
                unresolved.push(alert);
            }
        }
        self.metrics.unresolved_critical_alerts.set(unresolved.len() as i64);
        Ok(unresolved)
    }

    /// 升级超时未确认的高危警报
    pub async fn check_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let window = ChronoDuration::from_std(self.settings.escalation_window)
            .map_err(|e| ClinlabError::Config(e.to_string()))?;
        self.alerts.escalate_overdue(window, now).await
    }

    pub async fn overview(&self) -> Result<SystemOverview> {
        let mut orders_by_status = BTreeMap::new();
        for status in OrderStatus::all() {
            let count = self.repository.orders_by_status(status).await?.len();
            orders_by_status.insert(status.to_string(), count);
        }

        Ok(SystemOverview {
            orders_by_status,
            unacknowledged_alerts: self.repository.unacknowledged_alerts().await?.len(),
            unresolved_critical_alerts: self.unresolved_critical_alerts().await?.len(),
            work_queue: self.work_queue.read().await.stats(),
            generated_at: Utc::now(),
        })
    }

    /// 科室待检测工作项
    pub async fn department_queue(&self, department: &str) -> Vec<WorkItem> {
        self.work_queue
            .read()
            .await
            .department_queue(department)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn worksheets_for_order(&self, order_id: Uuid) -> Vec<Worksheet> {
        self.work_queue
            .read()
            .await
            .worksheets_for_order(order_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// 等待已排队的通知处理完
    pub async fn flush_notifications(&self) {
        self.alerts.queue().wait_idle().await;
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order> {
        self.repository
            .get_order(order_id)
            .await?
            .ok_or_else(|| ClinlabError::NotFound(format!("order {}", order_id)))
    }

    /// 医嘱明细引用的检验项目，顺序与明细一致
    async fn load_tests(&self, order: &Order) -> Result<Vec<LabTest>> {
        let mut tests = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let test = self
                .repository
                .get_test(item.test_id)
                .await?
                .ok_or_else(|| ClinlabError::NotFound(format!("test {}", item.test_id)))?;
            tests.push(test);
        }
        Ok(tests)
    }

    async fn store_documents(&self, requests: &[DocumentRequest]) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(requests.len());
        for request in requests {
            let handle = self
                .documents
                .store(&request.file_name, &request.content_type, &request.content)
                .await
                .map_err(|e| interface_error("document store", e))?;
            documents.push(Document {
                id: Uuid::new_v4(),
                file_name: request.file_name.clone(),
                content_type: request.content_type.clone(),
                handle,
                size: request.content.len() as u64,
                uploaded_at: Utc::now(),
            });
        }
        Ok(documents)
    }

    fn notify(&self, recipient: Recipient, notification: Notification) {
        self.alerts.notify(recipient, notification);
    }

    fn record_conflict(&self, error: &ClinlabError) {
        if error.kind() == ErrorKind::Concurrency {
            self.metrics.concurrency_conflicts.inc();
        }
    }
}

/// 外部协作方失败统一转换为接口错误
fn interface_error(collaborator: &str, error: anyhow::Error) -> ClinlabError {
    ClinlabError::Interface(format!("{}: {}", collaborator, error))
}
