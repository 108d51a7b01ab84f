//! 结果侧操作：录入、审核、接口结果接收

use super::{interface_error, OrderLifecycleManager};
use crate::alerting::RaisedAlert;
use crate::state_machine::OrderEvent;
use chrono::Utc;
use clinlab_core::{
    alert_types, evaluate, Alert, AlertSeverity, AlertTarget, ClinlabError, ErrorKind, LabResult,
    LabTest, Order, OrderItemStatus, OrderStatus, Recipient, Result, ResultRequest, ResultStatus,
    ResultValue, ResultValueRequest, ValidationFailure,
};
use clinlab_integration::{InterfaceResult, Notification, NotificationKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 结果录入的返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecording {
    pub result: LabResult,
    pub order_status: OrderStatus,
    /// 返回前已完成投递尝试的危急警报
    pub critical_alerts: Vec<RaisedAlert>,
    /// 接口重复投递时为 true，返回的是已存储的结果
    pub redelivered: bool,
}

/// 批量接收中单条失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub message_id: String,
    pub kind: String,
    pub error: String,
}

/// 批量接收结果，部分成功如实报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub errors: Vec<BatchItemError>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl OrderLifecycleManager {
    /// 录入结果
    ///
    /// 逐个结果值评估范围与趋势，危急值在返回前同步通知。
    pub async fn record_result(&self, request: ResultRequest) -> Result<ResultRecording> {
        if request.values.is_empty() {
            return Err(ValidationFailure::EmptyResult.into());
        }

        let order = self
            .repository
            .find_order_by_item(request.order_item_id)
            .await?
            .ok_or_else(|| ClinlabError::NotFound(format!("order item {}", request.order_item_id)))?;
        if !self.state_machine.can_transition(order.status, OrderEvent::ResultRecorded) {
            return Err(ClinlabError::InvalidStateTransition {
                from: order.status.to_string(),
                event: format!("{:?}", OrderEvent::ResultRecorded),
            });
        }

        let item = order
            .item(request.order_item_id)
            .ok_or_else(|| ClinlabError::NotFound(format!("order item {}", request.order_item_id)))?;
        if item.status == OrderItemStatus::Cancelled {
            return Err(ClinlabError::InvalidStateTransition {
                from: "Cancelled item".to_string(),
                event: format!("{:?}", OrderEvent::ResultRecorded),
            });
        }
        let test = self
            .repository
            .get_test(item.test_id)
            .await?
            .ok_or_else(|| ClinlabError::NotFound(format!("test {}", item.test_id)))?;

        let result_date = request.result_date.unwrap_or_else(Utc::now);
        let mut result = LabResult::new(order.id, item.id, order.patient_id, result_date);
        result.performing_lab = request.performing_lab;
        result.technician = request.technician;
        result.comments = request.comments;
        result.source_message_id = request.source_message_id;

        let mut seen = HashSet::new();
        for value_request in &request.values {
            if !seen.insert(value_request.component_id) {
                return Err(ValidationFailure::DuplicateComponent(value_request.component_id).into());
            }
        }

        for value_request in &request.values {
            let value = self.analyze_value(&order, &test, result_date, value_request).await?;
            result.upsert_value(value);
        }
        result.documents = self.store_documents(&request.documents).await?;

        // 结果与医嘱状态一起提交，之后不再有可失败的存储步骤先于危急警报
        let order = self.commit_result(order, &result).await?;
        self.metrics.results_recorded.inc();
        self.work_queue.write().await.mark_resulted(result.order_item_id);

        info!(
            order_number = %order.order_number,
            result_id = %result.id,
            abnormal = result.is_abnormal(),
            critical = result.is_critical(),
            order_status = %order.status,
            "Result recorded"
        );

        let mut critical_alerts = Vec::new();
        for value in result.critical_values() {
            critical_alerts.push(self.raise_critical(&order, &result, value).await?);
        }

        let notification = Notification::new(
            NotificationKind::ResultAvailable,
            order.id,
            order.order_number.clone(),
            format!("{} result available for order {}", test.name, order.order_number),
            result
                .values()
                .iter()
                .map(|v| format!("{} {}", v.component_code, v.raw_value))
                .collect::<Vec<_>>()
                .join(", "),
        )
        .with_payload(serde_json::json!({
            "result_id": result.id,
            "abnormal": result.is_abnormal(),
            "critical": result.is_critical(),
        }));
        self.notify(Recipient::Provider(order.provider_id), notification);

        Ok(ResultRecording {
            order_status: order.status,
            result,
            critical_alerts,
            redelivered: false,
        })
    }

    async fn analyze_value(
        &self,
        order: &Order,
        test: &LabTest,
        result_date: chrono::DateTime<Utc>,
        request: &ResultValueRequest,
    ) -> Result<ResultValue> {
        let component = test.component(request.component_id).ok_or_else(|| {
            ValidationFailure::ComponentNotInTest {
                component: request.component_id,
                test: test.name.clone(),
            }
        })?;

        let reference = component.resolved_reference(test);
        let critical = component.resolved_critical(test);

        let mut value = ResultValue::new(component, request.raw_value.clone(), request.units.clone());
        let flags = evaluate(&value.value, reference, critical);
        value.apply_ranges(reference, critical, flags);
        self.trend
            .annotate(order.patient_id, result_date, component, &mut value)
            .await?;
        Ok(value)
    }

    /// 把结果写回医嘱明细、推进医嘱状态，并与结果在同一次提交中持久化
    ///
    /// 版本冲突时重新读取再应用，超过重试次数后返回并发错误。
    /// 重新读取后医嘱已取消或已完成时以状态转换错误返回，结果不会落库。
    async fn commit_result(&self, mut order: Order, result: &LabResult) -> Result<Order> {
        let mut attempt = 0;
        loop {
            if let Some(item) = order.item_mut(result.order_item_id) {
                item.status = OrderItemStatus::Resulted;
                item.is_abnormal = result.is_abnormal();
                item.is_critical = result.is_critical();
                item.result_status = Some(result.status);
            }

            let mut status = self.state_machine.transition(order.status, OrderEvent::ResultRecorded)?;
            if order.all_items_resulted() {
                status = self.state_machine.transition(status, OrderEvent::AllItemsResulted)?;
            }
            order.status = status;
            order.updated_at = Utc::now();

            match self.repository.record_result(&order, result).await {
                Ok(version) => {
                    order.version = version;
                    return Ok(order);
                }
                Err(e) if e.kind() == ErrorKind::Concurrency => {
                    self.metrics.concurrency_conflicts.inc();
                    attempt += 1;
                    if attempt > self.settings.max_projection_retries {
                        error!(
                            order_id = %order.id,
                            result_id = %result.id,
                            "Result commit gave up after {} order conflicts",
                            attempt
                        );
                        return Err(e);
                    }
                    warn!(order_id = %order.id, attempt, "Order changed concurrently, re-reading");
                    order = self.load_order(order.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn raise_critical(&self, order: &Order, result: &LabResult, value: &ResultValue) -> Result<RaisedAlert> {
        let units = value.units.as_deref().unwrap_or("");
        let message = format!(
            "Critical {} {} {} (critical range {})",
            value.component_code,
            value.raw_value,
            units,
            value.critical_range.as_deref().unwrap_or("n/a")
        );

        let alert = Alert::new(
            AlertTarget::Result(result.id),
            order.id,
            alert_types::CRITICAL_VALUE,
            AlertSeverity::High,
            message.clone(),
        );
        let notification = Notification::new(
            NotificationKind::CriticalResult,
            order.id,
            order.order_number.clone(),
            format!("CRITICAL result on order {}", order.order_number),
            message,
        )
        .with_payload(serde_json::json!({
            "result_id": result.id,
            "patient_id": order.patient_id,
            "component": value.component_code,
            "value": value.raw_value,
            "units": value.units,
            "critical_range": value.critical_range,
        }));

        self.metrics.critical_alerts.inc();
        warn!(
            target: "audit",
            order_number = %order.order_number,
            result_id = %result.id,
            component = %value.component_code,
            value = %value.raw_value,
            "Critical value detected"
        );

        self.alerts.raise_urgent(alert, order.provider_id, notification).await
    }

    /// 已存储的危急结果没有对应危急警报时补发
    async fn reraise_missing_critical(&self, order: &Order, result: &LabResult) -> Result<Vec<RaisedAlert>> {
        if !result.is_critical() {
            return Ok(Vec::new());
        }

        let alerts = self.repository.alerts_for_order(order.id).await?;
        let already_raised = alerts
            .iter()
            .any(|a| a.is_critical_value() && matches!(a.target, AlertTarget::Result(id) if id == result.id));
        if already_raised {
            return Ok(Vec::new());
        }

        warn!(result_id = %result.id, "Critical result stored without alert, raising now");
        let mut raised = Vec::new();
        for value in result.critical_values() {
            raised.push(self.raise_critical(order, result, value).await?);
        }
        Ok(raised)
    }

    /// 审核结果
    ///
    /// 医嘱侧更新使用审核开始时读到的版本；期间若有新结果写入，审核以并发错误失败。
    /// 已审核的结果原样返回。
    pub async fn review_result(&self, result_id: Uuid, reviewer_id: Uuid) -> Result<LabResult> {
        let mut result = self.get_result(result_id).await?;
        if result.status == ResultStatus::Reviewed {
            info!(%result_id, "Result already reviewed");
            return Ok(result);
        }

        let mut order = self.load_order(result.order_id).await?;
        let reviewed_at = Utc::now();

        if let Some(item) = order.item_mut(result.order_item_id) {
            item.result_status = Some(ResultStatus::Reviewed);
        }
        order.updated_at = reviewed_at;
        order.version = self.repository.update_order(&order).await.map_err(|e| {
            self.record_conflict(&e);
            e
        })?;

        result.mark_reviewed(reviewer_id, reviewed_at);
        result.version = self.repository.update_result(&result).await.map_err(|e| {
            self.record_conflict(&e);
            e
        })?;

        info!(
            target: "audit",
            %result_id,
            %reviewer_id,
            order_number = %order.order_number,
            "Result reviewed"
        );

        if let Err(e) = self
            .clinical_record
            .update_lab_results(order.patient_id, &result)
            .await
        {
            error!(%result_id, "Clinical record update failed: {}", e);
        }

        match self.clinical_record.evaluate_result(order.patient_id, &result).await {
            Ok(findings) => {
                for finding in findings {
                    let alert = Alert::new(
                        AlertTarget::Result(result.id),
                        order.id,
                        alert_types::CLINICAL_FINDING,
                        finding.severity,
                        finding.message.clone(),
                    );
                    let notification = Notification::new(
                        NotificationKind::ClinicalFinding,
                        order.id,
                        order.order_number.clone(),
                        format!("Clinical finding on order {}", order.order_number),
                        finding.message,
                    );
                    if finding.severity == AlertSeverity::High {
                        self.alerts.raise_urgent(alert, order.provider_id, notification).await?;
                    } else {
                        self.alerts.raise_queued(alert, order.provider_id, notification).await?;
                    }
                }
            }
            Err(e) => error!(%result_id, "Clinical evaluation failed: {}", e),
        }

        self.notify(
            Recipient::Provider(order.provider_id),
            Notification::new(
                NotificationKind::ResultReviewed,
                order.id,
                order.order_number.clone(),
                format!("Result reviewed for order {}", order.order_number),
                "",
            ),
        );

        Ok(result)
    }

    /// 接收外部机构回传的结果
    ///
    /// 找不到对应医嘱时返回无法匹配错误，不会丢弃。成功后回执给接口；
    /// 回执失败只记录日志，接口重投时按消息ID去重。
    pub async fn process_interface_result(&self, interface_result: InterfaceResult) -> Result<ResultRecording> {
        let message_id = interface_result.message_id.clone();

        if let Some(existing) = self.repository.find_result_by_message_id(&message_id).await? {
            info!(%message_id, result_id = %existing.id, "Interface result already recorded");
            let order = self.load_order(existing.order_id).await?;
            let critical_alerts = self.reraise_missing_critical(&order, &existing).await?;
            self.acknowledge(&message_id).await;
            return Ok(ResultRecording {
                result: existing,
                order_status: order.status,
                critical_alerts,
                redelivered: true,
            });
        }

        let Some(order) = self
            .repository
            .find_order_by_external_id(&interface_result.external_order_id)
            .await?
        else {
            self.metrics.unmatched_results.inc();
            error!(
                %message_id,
                external_order_id = %interface_result.external_order_id,
                "Interface result does not match any order"
            );
            return Err(ClinlabError::UnmatchedResult {
                external_order_id: interface_result.external_order_id,
                message_id,
            });
        };

        let tests = self.load_tests(&order).await?;
        // 同一项目开了多次时优先填入尚未出结果的明细
        let candidates: Vec<_> = order
            .items
            .iter()
            .zip(tests.iter())
            .filter(|(item, test)| {
                test.code.eq_ignore_ascii_case(&interface_result.test_code)
                    && item.status != OrderItemStatus::Cancelled
            })
            .collect();
        let (item, test) = candidates
            .iter()
            .find(|(item, _)| item.status != OrderItemStatus::Resulted)
            .or(candidates.first())
            .copied()
            .ok_or_else(|| {
                ClinlabError::NotFound(format!(
                    "test {} on order {}",
                    interface_result.test_code, order.order_number
                ))
            })?;

        let mut values = Vec::with_capacity(interface_result.components.len());
        for component_value in &interface_result.components {
            let component = test.component_by_code(&component_value.code).ok_or_else(|| {
                ClinlabError::NotFound(format!("component {} of test {}", component_value.code, test.code))
            })?;
            values.push(ResultValueRequest {
                component_id: component.id,
                raw_value: component_value.value.clone(),
                units: component_value.units.clone(),
            });
        }

        let recording = self
            .record_result(ResultRequest {
                order_item_id: item.id,
                performing_lab: interface_result.performing_lab,
                technician: interface_result.technician,
                comments: interface_result.comments,
                result_date: interface_result.result_date,
                values,
                documents: Vec::new(),
                source_message_id: Some(message_id.clone()),
            })
            .await?;

        self.acknowledge(&message_id).await;
        Ok(recording)
    }

    /// 批量接收，单条失败不影响其余结果
    pub async fn process_interface_batch(&self, batch: Vec<InterfaceResult>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for interface_result in batch {
            let message_id = interface_result.message_id.clone();
            match self.process_interface_result(interface_result).await {
                Ok(_) => outcome.processed += 1,
                Err(e) => {
                    self.metrics.batch_failures.inc();
                    warn!(%message_id, "Interface result failed: {}", e);
                    outcome.errors.push(BatchItemError {
                        message_id,
                        kind: format!("{:?}", e.kind()),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            processed = outcome.processed,
            failed = outcome.errors.len(),
            "Interface batch processed"
        );
        outcome
    }

    async fn acknowledge(&self, message_id: &str) {
        let outcome = tokio::time::timeout(
            self.settings.gateway_timeout,
            self.gateway.acknowledge_result(message_id),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(message_id, "{}", interface_error("result acknowledgement", e)),
            Err(_) => warn!(message_id, "Result acknowledgement timed out"),
        }
    }
}
