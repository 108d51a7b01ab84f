//! 患者/医生身份目录

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 身份查询接口
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool>;

    async fn provider_exists(&self, provider_id: Uuid) -> Result<bool>;
}

/// 预先登记的身份目录
#[derive(Default)]
pub struct StaticDirectory {
    patients: RwLock<HashSet<Uuid>>,
    providers: RwLock<HashSet<Uuid>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_patient(&self, patient_id: Uuid) {
        self.patients.write().await.insert(patient_id);
    }

    pub async fn register_provider(&self, provider_id: Uuid) {
        self.providers.write().await.insert(provider_id);
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool> {
        Ok(self.patients.read().await.contains(&patient_id))
    }

    async fn provider_exists(&self, provider_id: Uuid) -> Result<bool> {
        Ok(self.providers.read().await.contains(&provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_identities() {
        let directory = StaticDirectory::new();
        let patient = Uuid::new_v4();
        directory.register_patient(patient).await;

        assert!(directory.patient_exists(patient).await.unwrap());
        assert!(!directory.provider_exists(patient).await.unwrap());
    }
}
