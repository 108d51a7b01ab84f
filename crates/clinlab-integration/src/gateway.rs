//! 外部检验机构接口网关
//!
//! 负责向外部检验机构发送申请、回执接口结果以及撤销申请。
//! 传输层失败一律以 `anyhow::Error` 返回，由引擎转换为接口错误。

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinlab_core::{ExternalLab, LabTest, Order, OrderPriority, SpecimenInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 认证方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticationConfig {
    None,
    BasicAuth { username: String, password: String },
    ApiKey { key: String, header: Option<String> },
    BearerToken { token: String },
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        AuthenticationConfig::None
    }
}

impl AuthenticationConfig {
    /// 为请求附加认证信息
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthenticationConfig::None => request,
            AuthenticationConfig::BasicAuth { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthenticationConfig::ApiKey { key, header } => {
                let header_name = header.as_deref().unwrap_or("X-API-Key");
                request.header(header_name, key)
            }
            AuthenticationConfig::BearerToken { token } => request.bearer_auth(token),
        }
    }
}

/// 发往外部机构的检验项目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTest {
    pub code: String,
    pub name: String,
    pub special_instructions: Option<String>,
}

/// 发往外部机构的申请单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub lab_code: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub priority: OrderPriority,
    pub is_fasting: bool,
    pub collection_date: Option<DateTime<Utc>>,
    pub specimen: SpecimenInfo,
    pub diagnosis_codes: Vec<String>,
    pub tests: Vec<GatewayTest>,
}

impl GatewayOrder {
    /// `tests` 需与医嘱明细一一对应
    pub fn build(order: &Order, tests: &[LabTest], lab: &ExternalLab) -> Self {
        let tests = order
            .items
            .iter()
            .filter_map(|item| {
                tests.iter().find(|t| t.id == item.test_id).map(|test| GatewayTest {
                    code: test.code.clone(),
                    name: test.name.clone(),
                    special_instructions: item.special_instructions.clone(),
                })
            })
            .collect();

        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            lab_code: lab.code.clone(),
            patient_id: order.patient_id,
            provider_id: order.provider_id,
            priority: order.priority,
            is_fasting: order.is_fasting,
            collection_date: order.collection_date,
            specimen: order.specimen.clone(),
            diagnosis_codes: order.diagnosis_codes.clone(),
            tests,
        }
    }
}

/// 外部机构受理回执
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayReceipt {
    pub external_order_id: String,
    pub message: Option<String>,
}

/// 接口结果中的单个组分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceComponentValue {
    pub code: String,
    pub value: String,
    pub units: Option<String>,
}

/// 外部机构异步回传的检验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceResult {
    pub message_id: String,
    pub external_order_id: String,
    pub test_code: String,
    pub performing_lab: Option<String>,
    pub technician: Option<String>,
    pub comments: Option<String>,
    pub result_date: Option<DateTime<Utc>>,
    pub components: Vec<InterfaceComponentValue>,
}

/// 外部检验机构接口
#[async_trait]
pub trait LabGateway: Send + Sync {
    /// 发送申请，返回外部申请号
    async fn send_order(&self, order: &GatewayOrder) -> Result<GatewayReceipt>;

    /// 确认已收到结果，外部机构据此停止重发
    async fn acknowledge_result(&self, message_id: &str) -> Result<()>;

    /// 撤销已发送的申请
    async fn cancel_order(&self, external_order_id: &str, reason: &str) -> Result<()>;
}

/// HTTP 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGatewayConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
}

/// 基于 REST 的外部机构网关
pub struct HttpLabGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpLabGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.config.authentication.apply(request).send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Lab gateway returned {} for {}: {}", status, path, text);
            Err(anyhow!("lab gateway returned {} for {}", status, path))
        }
    }
}

#[async_trait]
impl LabGateway for HttpLabGateway {
    async fn send_order(&self, order: &GatewayOrder) -> Result<GatewayReceipt> {
        debug!("Sending order {} to lab {}", order.order_number, order.lab_code);
        let receipt: GatewayReceipt = self.post_json("orders", order).await?.json().await?;
        info!(
            "Order {} accepted by lab {} as {}",
            order.order_number, order.lab_code, receipt.external_order_id
        );
        Ok(receipt)
    }

    async fn acknowledge_result(&self, message_id: &str) -> Result<()> {
        self.post_json(&format!("results/{}/ack", message_id), &serde_json::json!({}))
            .await?;
        debug!("Acknowledged interface message {}", message_id);
        Ok(())
    }

    async fn cancel_order(&self, external_order_id: &str, reason: &str) -> Result<()> {
        self.post_json(
            &format!("orders/{}/cancel", external_order_id),
            &serde_json::json!({ "reason": reason }),
        )
        .await?;
        info!("Cancelled external order {}", external_order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_header() {
        let auth = AuthenticationConfig::ApiKey {
            key: "secret".into(),
            header: Some("X-Lab-Key".into()),
        };
        let request = auth
            .apply(reqwest::Client::new().get("http://lab.local/orders"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["X-Lab-Key"], "secret");
    }

    #[test]
    fn test_bearer_token_header() {
        let auth = AuthenticationConfig::BearerToken { token: "abc".into() };
        let request = auth
            .apply(reqwest::Client::new().get("http://lab.local/orders"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }

    #[test]
    fn test_interface_result_parses() {
        let json = r#"{
            "message_id": "MSG-001",
            "external_order_id": "EXT-42",
            "test_code": "K",
            "performing_lab": "Quest",
            "technician": null,
            "comments": null,
            "result_date": null,
            "components": [{"code": "K", "value": "7.2", "units": "mmol/L"}]
        }"#;
        let result: InterfaceResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.external_order_id, "EXT-42");
        assert_eq!(result.components[0].value, "7.2");
    }

    #[test]
    fn test_authentication_config_serde() {
        let auth: AuthenticationConfig =
            serde_json::from_str(r#"{"type": "bearer_token", "token": "t"}"#).unwrap();
        assert_eq!(auth, AuthenticationConfig::BearerToken { token: "t".into() });
        assert_eq!(AuthenticationConfig::default(), AuthenticationConfig::None);
    }

    #[test]
    fn test_gateway_url_joins_endpoint() {
        let gateway = HttpLabGateway::new(HttpGatewayConfig {
            endpoint: "http://lab.local/api/".into(),
            timeout_ms: 1000,
            authentication: AuthenticationConfig::None,
        })
        .unwrap();
        assert_eq!(gateway.url("orders"), "http://lab.local/api/orders");
    }
}
