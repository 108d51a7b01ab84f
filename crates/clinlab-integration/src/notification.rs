//! 通知分发
//!
//! 引擎只关心"通知谁、什么内容"，具体通道（推送、短信、邮件）由分发器实现。

use crate::gateway::AuthenticationConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinlab_core::Recipient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    OrderCreated,
    OrderSubmitted,
    OrderCancelled,
    ResultAvailable,
    ResultReviewed,
    CriticalResult,
    CriticalEscalation,
    OrderAlert,
    ClinicalFinding,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderSubmitted => "order.submitted",
            Self::OrderCancelled => "order.cancelled",
            Self::ResultAvailable => "result.available",
            Self::ResultReviewed => "result.reviewed",
            Self::CriticalResult => "result.critical",
            Self::CriticalEscalation => "alert.escalated",
            Self::OrderAlert => "order.alert",
            Self::ClinicalFinding => "clinical.finding",
        }
    }
}

/// 紧急程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Routine,
    Urgent,
}

/// 通知内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub urgency: Urgency,
    pub subject: String,
    pub body: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        order_id: Uuid,
        order_number: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            urgency: Urgency::Routine,
            subject: subject.into(),
            body: body.into(),
            order_id,
            order_number: order_number.into(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn urgent(mut self) -> Self {
        self.urgency = Urgency::Urgent;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// 通知分发器
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_provider(&self, provider_id: Uuid, notification: &Notification) -> Result<()>;

    async fn notify_lab_staff(&self, notification: &Notification) -> Result<()>;

    async fn notify_supervisor(&self, notification: &Notification) -> Result<()>;
}

/// 按接收方分派到对应方法
pub async fn deliver(
    dispatcher: &dyn NotificationDispatcher,
    recipient: Recipient,
    notification: &Notification,
) -> Result<()> {
    match recipient {
        Recipient::Provider(provider_id) => dispatcher.notify_provider(provider_id, notification).await,
        Recipient::LabStaff => dispatcher.notify_lab_staff(notification).await,
        Recipient::Supervisor => dispatcher.notify_supervisor(notification).await,
    }
}

/// 生成签名
pub fn generate_signature(payload: &str, secret: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(secret);
    format!("sha256={:x}", hasher.finalize())
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    recipient: String,
    event: &'static str,
    notification: &'a Notification,
}

/// Webhook 通知分发器
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    authentication: AuthenticationConfig,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
            authentication: AuthenticationConfig::None,
        })
    }

    pub fn with_authentication(mut self, authentication: AuthenticationConfig) -> Self {
        self.authentication = authentication;
        self
    }

    async fn post(&self, recipient: Recipient, notification: &Notification) -> Result<()> {
        let envelope = WebhookEnvelope {
            recipient: recipient.to_string(),
            event: notification.kind.as_str(),
            notification,
        };
        let payload = serde_json::to_string(&envelope)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Clinlab-Event", notification.kind.as_str())
            .body(payload.clone());

        if let Some(secret) = &self.secret {
            request = request.header("X-Clinlab-Signature", generate_signature(&payload, secret));
        }

        let response = self.authentication.apply(request).send().await?;
        if response.status().is_success() {
            info!(
                "Delivered {} for order {} to {}",
                notification.kind.as_str(),
                notification.order_number,
                recipient
            );
            Ok(())
        } else {
            let status = response.status();
            error!("Webhook failed with status {}: {}", status, self.url);
            Err(anyhow!("webhook returned {}", status))
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify_provider(&self, provider_id: Uuid, notification: &Notification) -> Result<()> {
        self.post(Recipient::Provider(provider_id), notification).await
    }

    async fn notify_lab_staff(&self, notification: &Notification) -> Result<()> {
        self.post(Recipient::LabStaff, notification).await
    }

    async fn notify_supervisor(&self, notification: &Notification) -> Result<()> {
        self.post(Recipient::Supervisor, notification).await
    }
}

/// 只写日志的分发器，用于未配置 Webhook 的部署
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    fn log(recipient: Recipient, notification: &Notification) {
        info!(
            recipient = %recipient,
            kind = notification.kind.as_str(),
            urgency = ?notification.urgency,
            order_number = %notification.order_number,
            "{}",
            notification.subject
        );
    }
}

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify_provider(&self, provider_id: Uuid, notification: &Notification) -> Result<()> {
        Self::log(Recipient::Provider(provider_id), notification);
        Ok(())
    }

    async fn notify_lab_staff(&self, notification: &Notification) -> Result<()> {
        Self::log(Recipient::LabStaff, notification);
        Ok(())
    }

    async fn notify_supervisor(&self, notification: &Notification) -> Result<()> {
        Self::log(Recipient::Supervisor, notification);
        Ok(())
    }
}
