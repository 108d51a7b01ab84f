//! 内存仓储实现
//!
//! 所有状态放在一把读写锁后面，版本检查与写入在同一次加锁内完成。

use crate::repository::{OrderRepository, PriorValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinlab_core::{
    Alert, ClinlabError, ExternalLab, LabResult, LabTest, NotificationRecord, Order, OrderStatus,
    Result, ResultStatus,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    tests: HashMap<Uuid, LabTest>,
    external_labs: HashMap<Uuid, ExternalLab>,
    orders: HashMap<Uuid, Order>,
    results: HashMap<Uuid, LabResult>,
    alerts: HashMap<Uuid, Alert>,
    notifications: Vec<NotificationRecord>,
    sequences: HashMap<NaiveDate, u32>,
}

impl MemoryState {
    fn check_order_version(&self, order: &Order) -> Result<()> {
        let stored = self
            .orders
            .get(&order.id)
            .ok_or_else(|| ClinlabError::NotFound(format!("order {}", order.id)))?;
        if stored.version != order.version {
            return Err(ClinlabError::Concurrency {
                entity: "order",
                id: order.id,
                expected_version: order.version,
            });
        }
        Ok(())
    }

    fn update_order(&mut self, order: &Order) -> Result<i64> {
        self.check_order_version(order)?;

        let mut updated = order.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        let version = updated.version;
        self.orders.insert(order.id, updated);
        Ok(version)
    }

    fn check_message_unique(&self, result: &LabResult) -> Result<()> {
        if let Some(message_id) = &result.source_message_id {
            if self
                .results
                .values()
                .any(|r| r.source_message_id.as_ref() == Some(message_id))
            {
                return Err(ClinlabError::Database(format!(
                    "duplicate interface message {}",
                    message_id
                )));
            }
        }
        Ok(())
    }

    fn insert_result(&mut self, result: &LabResult) -> Result<()> {
        self.check_message_unique(result)?;
        self.results.insert(result.id, result.clone());
        Ok(())
    }
}

/// 内存仓储
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository {
    async fn upsert_test(&self, test: &LabTest) -> Result<()> {
        self.state.write().await.tests.insert(test.id, test.clone());
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>> {
        Ok(self.state.read().await.tests.get(&id).cloned())
    }

    async fn upsert_external_lab(&self, lab: &ExternalLab) -> Result<()> {
        self.state
            .write()
            .await
            .external_labs
            .insert(lab.id, lab.clone());
        Ok(())
    }

    async fn get_external_lab(&self, id: Uuid) -> Result<Option<ExternalLab>> {
        Ok(self.state.read().await.external_labs.get(&id).cloned())
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32> {
        let mut state = self.state.write().await;
        let counter = state.sequences.entry(day).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|existing| existing.order_number == order.order_number)
        {
            return Err(ClinlabError::Database(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_item(&self, item_id: Uuid) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.item(item_id).is_some())
            .cloned())
    }

    async fn find_order_by_external_id(&self, external_order_id: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.external_order_id.as_deref() == Some(external_order_id))
            .cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<i64> {
        self.state.write().await.update_order(order)
    }

    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.order_date);
        Ok(orders)
    }

    async fn insert_result(&self, result: &LabResult) -> Result<()> {
        self.state.write().await.insert_result(result)
    }

    async fn record_result(&self, order: &Order, result: &LabResult) -> Result<i64> {
        let mut state = self.state.write().await;
        state.check_message_unique(result)?;
        state.check_order_version(order)?;
        state.insert_result(result)?;
        state.update_order(order)
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>> {
        Ok(self.state.read().await.results.get(&id).cloned())
    }

    async fn update_result(&self, result: &LabResult) -> Result<i64> {
        let mut state = self.state.write().await;
        let stored = state
            .results
            .get_mut(&result.id)
            .ok_or_else(|| ClinlabError::NotFound(format!("result {}", result.id)))?;

        if stored.version != result.version {
            return Err(ClinlabError::Concurrency {
                entity: "result",
                id: result.id,
                expected_version: result.version,
            });
        }

        let mut updated = result.clone();
        updated.version += 1;
        let version = updated.version;
        *stored = updated;
        Ok(version)
    }

    async fn results_for_order(&self, order_id: Uuid) -> Result<Vec<LabResult>> {
        let state = self.state.read().await;
        let mut results: Vec<LabResult> = state
            .results
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.result_date);
        Ok(results)
    }

    async fn find_result_by_message_id(&self, message_id: &str) -> Result<Option<LabResult>> {
        let state = self.state.read().await;
        Ok(state
            .results
            .values()
            .find(|r| r.source_message_id.as_deref() == Some(message_id))
            .cloned())
    }

    async fn results_by_status(&self, status: ResultStatus) -> Result<Vec<LabResult>> {
        let state = self.state.read().await;
        let mut results: Vec<LabResult> = state
            .results
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.result_date);
        Ok(results)
    }

    async fn latest_value_before(
        &self,
        patient_id: Uuid,
        component_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<PriorValue>> {
        let state = self.state.read().await;
        let prior = state
            .results
            .values()
            .filter(|r| r.patient_id == patient_id && r.result_date < before)
            .filter_map(|r| {
                r.values()
                    .iter()
                    .find(|v| v.component_id == component_id)
                    .map(|v| (r.result_date, v))
            })
            .max_by_key(|(date, _)| *date)
            .map(|(date, v)| PriorValue {
                raw_value: v.raw_value.clone(),
                value: v.value.clone(),
                result_date: date,
            });
        Ok(prior)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.state
            .write()
            .await
            .alerts
            .insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.state.read().await.alerts.get(&id).cloned())
    }

    async fn acknowledge_alert(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&id)
            .ok_or_else(|| ClinlabError::NotFound(format!("alert {}", id)))?;
        alert.acknowledge(user_id, at);
        Ok(alert.clone())
    }

    async fn unacknowledged_alerts(&self) -> Result<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| !a.is_acknowledged())
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn alerts_for_order(&self, order_id: Uuid) -> Result<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn append_notification(&self, record: &NotificationRecord) -> Result<()> {
        self.state.write().await.notifications.push(record.clone());
        Ok(())
    }

    async fn notification_records(&self, alert_id: Uuid) -> Result<Vec<NotificationRecord>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|r| r.alert_id == alert_id)
            .cloned()
            .collect())
    }
}
