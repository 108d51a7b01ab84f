//! 危急值与医嘱警报的通知流程
//!
//! 危急警报在调用方内同步投递：开单医生（紧急）与主管两条线路并发进行，
//! 互不影响。主通道失败时改走备用通道，仍失败则警报保持"未解决"。
//! 其余警报进入通知队列异步投递。

use crate::metrics::EngineMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clinlab_core::{
    Alert, AlertDeliveryStatus, AlertSeverity, DeliveryChannel, NotificationRecord, Recipient, Result,
};
use clinlab_database::OrderRepository;
use clinlab_integration::notification::deliver;
use clinlab_integration::{Notification, NotificationDispatcher, NotificationKind, NotificationQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 已创建的警报及其投递结论
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaisedAlert {
    pub alert: Alert,
    pub delivery: AlertDeliveryStatus,
}

/// 警报分发
pub struct AlertDispatcher {
    repository: Arc<dyn OrderRepository>,
    primary: Arc<dyn NotificationDispatcher>,
    fallback: Option<Arc<dyn NotificationDispatcher>>,
    queue: NotificationQueue,
    delivery_timeout: Duration,
    metrics: EngineMetrics,
}

impl AlertDispatcher {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        primary: Arc<dyn NotificationDispatcher>,
        fallback: Option<Arc<dyn NotificationDispatcher>>,
        queue: NotificationQueue,
        delivery_timeout: Duration,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            repository,
            primary,
            fallback,
            queue,
            delivery_timeout,
            metrics,
        }
    }

    /// 异步通知，失败只记录日志
    pub fn notify(&self, recipient: Recipient, notification: Notification) {
        self.queue.enqueue(recipient, notification);
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// 持久化警报并立即投递给开单医生和主管
    ///
    /// 返回前两条线路都已尝试完毕，投递记录已追加。
    pub async fn raise_urgent(
        &self,
        alert: Alert,
        provider_id: Uuid,
        notification: Notification,
    ) -> Result<RaisedAlert> {
        self.repository.insert_alert(&alert).await?;
        let notification = notification.urgent();

        let (provider_records, supervisor_records) = tokio::join!(
            self.deliver_with_fallback(alert.id, Recipient::Provider(provider_id), &notification, DeliveryChannel::Primary),
            self.deliver_with_fallback(alert.id, Recipient::Supervisor, &notification, DeliveryChannel::Primary),
        );

        let records: Vec<NotificationRecord> = provider_records.into_iter().chain(supervisor_records).collect();
        for record in &records {
            self.repository.append_notification(record).await?;
        }

        let delivery = AlertDeliveryStatus::derive(&records);
        if delivery == AlertDeliveryStatus::Unresolved {
            self.metrics.unresolved_critical_alerts.inc();
            error!(
                alert_id = %alert.id,
                order_id = %alert.order_id,
                "Urgent alert could not be delivered to every recipient, left unresolved"
            );
        }

        info!(
            target: "audit",
            alert_id = %alert.id,
            order_id = %alert.order_id,
            alert_type = %alert.alert_type,
            delivery = ?delivery,
            "Urgent alert notified"
        );

        Ok(RaisedAlert { alert, delivery })
    }

    /// 持久化警报，通知进入队列
    pub async fn raise_queued(
        &self,
        alert: Alert,
        provider_id: Uuid,
        notification: Notification,
    ) -> Result<Alert> {
        self.repository.insert_alert(&alert).await?;
        self.queue.enqueue(Recipient::Provider(provider_id), notification);
        Ok(alert)
    }

    /// 根据投递记录推导警报状态；没有任何记录视为已送达（异步警报）
    pub async fn delivery_status(&self, alert_id: Uuid) -> Result<AlertDeliveryStatus> {
        let records = self.repository.notification_records(alert_id).await?;
        if records.is_empty() {
            return Ok(AlertDeliveryStatus::Delivered);
        }
        Ok(AlertDeliveryStatus::derive(&records))
    }

    /// 未确认且超过升级时限的高危警报重新通知主管
    ///
    /// 每个警报只升级一次。
    pub async fn escalate_overdue(&self, window: ChronoDuration, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let cutoff = now - window;
        let mut escalated = Vec::new();

        for alert in self.repository.unacknowledged_alerts().await? {
            if alert.severity != AlertSeverity::High || alert.created_at > cutoff {
                continue;
            }

            let records = self.repository.notification_records(alert.id).await?;
            if records.iter().any(|r| r.channel == DeliveryChannel::Escalation) {
                continue;
            }

            let order_number = match self.repository.get_order(alert.order_id).await? {
                Some(order) => order.order_number,
                None => String::new(),
            };

            let notification = Notification::new(
                NotificationKind::CriticalEscalation,
                alert.order_id,
                order_number,
                format!("Unacknowledged alert: {}", alert.alert_type),
                alert.message.clone(),
            )
            .urgent()
            .with_payload(serde_json::json!({
                "alert_id": alert.id,
                "created_at": alert.created_at,
            }));

            let records = self
                .deliver_with_fallback(alert.id, Recipient::Supervisor, &notification, DeliveryChannel::Escalation)
                .await;
            for record in &records {
                self.repository.append_notification(record).await?;
            }

            warn!(
                target: "audit",
                alert_id = %alert.id,
                order_id = %alert.order_id,
                "Alert escalated to supervisor after {} minutes unacknowledged",
                window.num_minutes()
            );
            escalated.push(alert);
        }

        Ok(escalated)
    }

    async fn deliver_with_fallback(
        &self,
        alert_id: Uuid,
        recipient: Recipient,
        notification: &Notification,
        channel: DeliveryChannel,
    ) -> Vec<NotificationRecord> {
        let mut records = Vec::with_capacity(2);

        match self.attempt(self.primary.as_ref(), recipient, notification).await {
            Ok(()) => {
                records.push(NotificationRecord::delivered(alert_id, recipient, channel));
                return records;
            }
            Err(e) => {
                error!(%alert_id, %recipient, "Urgent delivery failed: {}", e);
                records.push(NotificationRecord::failed(alert_id, recipient, channel, e));
            }
        }

        let Some(fallback) = &self.fallback else {
            return records;
        };

        match self.attempt(fallback.as_ref(), recipient, notification).await {
            Ok(()) => {
                warn!(%alert_id, %recipient, "Urgent alert delivered through fallback channel");
                records.push(NotificationRecord::delivered(alert_id, recipient, DeliveryChannel::Fallback));
            }
            Err(e) => {
                error!(%alert_id, %recipient, "Fallback delivery failed: {}", e);
                records.push(NotificationRecord::failed(alert_id, recipient, DeliveryChannel::Fallback, e));
            }
        }

        records
    }

    async fn attempt(
        &self,
        dispatcher: &dyn NotificationDispatcher,
        recipient: Recipient,
        notification: &Notification,
    ) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.delivery_timeout, deliver(dispatcher, recipient, notification)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("delivery timed out after {:?}", self.delivery_timeout)),
        }
    }
}
