//! 临床校验与临床档案服务

use anyhow::Result;
use async_trait::async_trait;
use clinlab_core::{AlertSeverity, LabResult, Order, OrderRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 临床校验结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    Rejected(String),
}

/// 临床档案对审核结果的附加发现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalFinding {
    pub severity: AlertSeverity,
    pub message: String,
}

/// 开单前的临床合理性校验
#[async_trait]
pub trait ClinicalValidation: Send + Sync {
    async fn validate_order(&self, request: &OrderRequest) -> Result<Verdict>;

    /// 按临床政策判断是否需要保险授权
    async fn requires_authorization(&self, order: &Order) -> Result<bool>;
}

/// 患者临床档案
#[async_trait]
pub trait ClinicalRecord: Send + Sync {
    /// 写入已审核的检验结果
    async fn update_lab_results(&self, patient_id: Uuid, result: &LabResult) -> Result<()>;

    /// 结合患者整体档案评估结果，返回需要额外提示的发现
    async fn evaluate_result(&self, patient_id: Uuid, result: &LabResult) -> Result<Vec<ClinicalFinding>>;
}

/// 接受所有医嘱、不附加任何发现的默认实现
#[derive(Debug, Default)]
pub struct PermissiveClinicalService;

#[async_trait]
impl ClinicalValidation for PermissiveClinicalService {
    async fn validate_order(&self, request: &OrderRequest) -> Result<Verdict> {
        if request.tests.is_empty() {
            return Ok(Verdict::Rejected("no tests requested".to_string()));
        }
        Ok(Verdict::Accepted)
    }

    async fn requires_authorization(&self, _order: &Order) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl ClinicalRecord for PermissiveClinicalService {
    async fn update_lab_results(&self, patient_id: Uuid, result: &LabResult) -> Result<()> {
        tracing::debug!(%patient_id, result_id = %result.id, "Clinical record updated");
        Ok(())
    }

    async fn evaluate_result(&self, _patient_id: Uuid, _result: &LabResult) -> Result<Vec<ClinicalFinding>> {
        Ok(Vec::new())
    }
}
