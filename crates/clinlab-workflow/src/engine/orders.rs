//! 医嘱侧操作：开单、提交、取消以及待提交状态下的修改

use super::{interface_error, OrderLifecycleManager};
use crate::rules;
use crate::state_machine::OrderEvent;
use crate::worklist::Assignment;
use chrono::{DateTime, Utc};
use clinlab_core::{
    alert_types, Alert, AlertSeverity, AlertTarget, ApprovalStatus, ClinlabError, LabTest, Order,
    OrderItem, OrderItemStatus, OrderRequest, OrderStatus, Recipient, Result, ValidationFailure,
};
use clinlab_integration::{GatewayOrder, Notification, NotificationKind, Verdict};
use tracing::{error, info, warn};
use uuid::Uuid;

impl OrderLifecycleManager {
    /// 开单
    ///
    /// 校验顺序：患者、医生、检验项目、外部机构、临床校验，任一失败立即返回。
    pub async fn create_order(&self, request: OrderRequest) -> Result<Order> {
        if request.tests.is_empty() {
            return Err(ValidationFailure::NoTestsRequested.into());
        }

        let patient_exists = self
            .identity
            .patient_exists(request.patient_id)
            .await
            .map_err(|e| interface_error("identity directory", e))?;
        if !patient_exists {
            return Err(ValidationFailure::PatientNotFound(request.patient_id).into());
        }

        let provider_exists = self
            .identity
            .provider_exists(request.provider_id)
            .await
            .map_err(|e| interface_error("identity directory", e))?;
        if !provider_exists {
            return Err(ValidationFailure::ProviderNotFound(request.provider_id).into());
        }

        let mut tests: Vec<LabTest> = Vec::with_capacity(request.tests.len());
        for item in &request.tests {
            let test = self
                .repository
                .get_test(item.test_id)
                .await?
                .ok_or(ValidationFailure::TestNotFound(item.test_id))?;
            if !test.is_active {
                return Err(ValidationFailure::TestInactive { name: test.name }.into());
            }
            tests.push(test);
        }

        if let Some(lab_id) = request.external_lab_id {
            self.require_active_lab(lab_id).await?;
        }

        let verdict = self
            .clinical_validation
            .validate_order(&request)
            .await
            .map_err(|e| interface_error("clinical validation", e))?;
        if let Verdict::Rejected(reason) = verdict {
            return Err(ValidationFailure::ClinicalRejected(reason).into());
        }

        let order_number = self.order_numbers.next_number().await?;
        let documents = self.store_documents(&request.documents).await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let items = request
            .tests
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                test_id: item.test_id,
                status: OrderItemStatus::Pending,
                priority: item.priority.unwrap_or(request.priority),
                special_instructions: item.special_instructions.clone(),
                is_abnormal: false,
                is_critical: false,
                result_status: None,
            })
            .collect();

        let order = Order {
            id: order_id,
            order_number,
            patient_id: request.patient_id,
            provider_id: request.provider_id,
            encounter_id: request.encounter_id,
            order_date: now,
            collection_date: None,
            status: OrderStatus::Pending,
            priority: request.priority,
            clinical_notes: request.clinical_notes,
            diagnosis_codes: request.diagnosis_codes,
            is_fasting: request.is_fasting,
            specimen: request.specimen,
            external_lab_id: request.external_lab_id,
            external_order_id: None,
            requires_approval: request.requires_approval,
            approval_status: if request.requires_approval {
                ApprovalStatus::Pending
            } else {
                ApprovalStatus::NotRequired
            },
            approved_by: None,
            approval_date: None,
            approval_notes: None,
            authorization_number: None,
            cancellation_reason: None,
            items,
            documents,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert_order(&order).await?;
        self.metrics.orders_created.inc();

        info!(
            target: "audit",
            order_id = %order.id,
            order_number = %order.order_number,
            patient_id = %order.patient_id,
            provider_id = %order.provider_id,
            tests = order.items.len(),
            "Lab order created"
        );

        let notification = Notification::new(
            NotificationKind::OrderCreated,
            order.id,
            order.order_number.clone(),
            format!("Lab order {} created", order.order_number),
            tests.iter().map(|t| t.code.as_str()).collect::<Vec<_>>().join(", "),
        );
        self.notify(Recipient::Provider(order.provider_id), notification.clone());
        if !order.is_external() {
            self.notify(Recipient::LabStaff, notification);
        }

        Ok(order)
    }

    /// 提交医嘱
    ///
    /// 外部机构接口失败或超时时医嘱保持待提交，调用方可重新提交。
    pub async fn submit_order(&self, order_id: Uuid) -> Result<Order> {
        let mut order = self.load_order(order_id).await?;
        let next = self.state_machine.transition(order.status, OrderEvent::Submit)?;

        let tests = self.load_tests(&order).await?;
        rules::check_submission(&order, &tests)?;

        let authorization_required = self
            .clinical_validation
            .requires_authorization(&order)
            .await
            .map_err(|e| interface_error("clinical validation", e))?;
        let authorized = order
            .authorization_number
            .as_deref()
            .map_or(false, |n| !n.trim().is_empty());
        if authorization_required && !authorized {
            return Err(ValidationFailure::AuthorizationRequired.into());
        }

        if let Some(lab_id) = order.external_lab_id {
            let lab = self.require_active_lab(lab_id).await?;
            let gateway_order = GatewayOrder::build(&order, &tests, &lab);

            let receipt = match tokio::time::timeout(
                self.settings.gateway_timeout,
                self.gateway.send_order(&gateway_order),
            )
            .await
            {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(e)) => {
                    self.metrics.gateway_failures.inc();
                    warn!(order_number = %order.order_number, lab = %lab.code, "Gateway rejected order: {}", e);
                    return Err(interface_error("lab gateway", e));
                }
                Err(_) => {
                    self.metrics.gateway_failures.inc();
                    warn!(order_number = %order.order_number, lab = %lab.code, "Gateway timed out");
                    return Err(ClinlabError::Interface(format!(
                        "lab gateway: no response within {:?}",
                        self.settings.gateway_timeout
                    )));
                }
            };

            info!(
                order_number = %order.order_number,
                external_order_id = %receipt.external_order_id,
                "Order sent to external lab {}",
                lab.code
            );
            order.external_order_id = Some(receipt.external_order_id);
        }

        order.status = next;
        for item in order.items.iter_mut().filter(|i| i.status == OrderItemStatus::Pending) {
            item.status = OrderItemStatus::Submitted;
        }
        order.updated_at = Utc::now();
        order.version = self.repository.update_order(&order).await.map_err(|e| {
            self.record_conflict(&e);
            e
        })?;

        if !order.is_external() {
            let assignments: Vec<Assignment<'_>> = order
                .items
                .iter()
                .zip(tests.iter())
                .map(|(item, test)| Assignment {
                    order_item_id: item.id,
                    priority: item.priority,
                    test,
                    department: self.router.route(test, item.priority).department,
                })
                .collect();
            self.work_queue.write().await.enqueue(&order, &assignments);
        }

        self.metrics.orders_submitted.inc();
        info!(
            target: "audit",
            order_id = %order.id,
            order_number = %order.order_number,
            external = order.is_external(),
            "Lab order submitted"
        );

        let notification = Notification::new(
            NotificationKind::OrderSubmitted,
            order.id,
            order.order_number.clone(),
            format!("Lab order {} submitted", order.order_number),
            "",
        );
        self.notify(Recipient::Provider(order.provider_id), notification.clone());
        if !order.is_external() {
            self.notify(Recipient::LabStaff, notification);
        }

        Ok(order)
    }

    /// 取消整张医嘱
    ///
    /// 已有结果的医嘱不可取消。外部机构撤单失败不影响取消，只生成警告警报。
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<Order> {
        let mut order = self.load_order(order_id).await?;
        let has_results = !self.repository.results_for_order(order.id).await?.is_empty();
        rules::check_cancellation(&order, has_results)?;
        let next = self.state_machine.transition(order.status, OrderEvent::Cancel)?;

        let external_cancel = match (&order.external_order_id, order.status) {
            (Some(external_id), OrderStatus::Submitted) => Some(external_id.clone()),
            _ => None,
        };

        order.status = next;
        order.cancellation_reason = Some(reason.to_string());
        for item in order.items.iter_mut().filter(|i| i.status != OrderItemStatus::Resulted) {
            item.status = OrderItemStatus::Cancelled;
        }
        order.updated_at = Utc::now();
        // 结果与医嘱版本一起提交，检查之后写入的结果会让这里以并发错误失败
        order.version = self.repository.update_order(&order).await.map_err(|e| {
            self.record_conflict(&e);
            e
        })?;

        self.work_queue.write().await.remove_order(order.id);
        self.metrics.orders_cancelled.inc();

        info!(
            target: "audit",
            order_id = %order.id,
            order_number = %order.order_number,
            reason,
            "Lab order cancelled"
        );

        if let Some(external_id) = external_cancel {
            self.cancel_externally(&order, &external_id, reason).await?;
        }

        let notification = Notification::new(
            NotificationKind::OrderCancelled,
            order.id,
            order.order_number.clone(),
            format!("Lab order {} cancelled", order.order_number),
            reason,
        );
        self.notify(Recipient::Provider(order.provider_id), notification.clone());
        if !order.is_external() {
            self.notify(Recipient::LabStaff, notification);
        }

        Ok(order)
    }

    async fn cancel_externally(&self, order: &Order, external_id: &str, reason: &str) -> Result<()> {
        let outcome = tokio::time::timeout(
            self.settings.gateway_timeout,
            self.gateway.cancel_order(external_id, reason),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "no response from lab gateway".to_string(),
        };

        self.metrics.gateway_failures.inc();
        error!(
            order_number = %order.order_number,
            external_order_id = external_id,
            "External cancellation failed: {}",
            failure
        );

        let message = format!(
            "External lab was not notified of cancellation ({}); contact the lab to stop order {}",
            failure, external_id
        );
        let alert = Alert::new(
            AlertTarget::Order(order.id),
            order.id,
            alert_types::EXTERNAL_CANCELLATION,
            AlertSeverity::Warning,
            message.clone(),
        );
        let notification = Notification::new(
            NotificationKind::OrderAlert,
            order.id,
            order.order_number.clone(),
            format!("External cancellation failed for {}", order.order_number),
            message,
        );
        self.alerts.raise_queued(alert, order.provider_id, notification).await?;
        Ok(())
    }

    /// 审批通过
    pub async fn approve_order(&self, order_id: Uuid, approver_id: Uuid) -> Result<Order> {
        self.decide_approval(order_id, approver_id, ApprovalStatus::Approved, None)
            .await
    }

    /// 审批驳回
    pub async fn reject_approval(&self, order_id: Uuid, approver_id: Uuid, reason: &str) -> Result<Order> {
        let order = self
            .decide_approval(order_id, approver_id, ApprovalStatus::Rejected, Some(reason))
            .await?;

        self.notify(
            Recipient::Provider(order.provider_id),
            Notification::new(
                NotificationKind::OrderAlert,
                order.id,
                order.order_number.clone(),
                format!("Approval rejected for order {}", order.order_number),
                reason,
            ),
        );
        Ok(order)
    }

    async fn decide_approval(
        &self,
        order_id: Uuid,
        approver_id: Uuid,
        decision: ApprovalStatus,
        notes: Option<&str>,
    ) -> Result<Order> {
        let mut order = self.load_order(order_id).await?;
        rules::check_approval_pending(&order)?;

        order.approval_status = decision;
        order.approved_by = Some(approver_id);
        order.approval_date = Some(Utc::now());
        order.approval_notes = notes.map(str::to_string);
        self.save_pending(&mut order).await?;

        info!(
            target: "audit",
            order_id = %order.id,
            order_number = %order.order_number,
            %approver_id,
            decision = %decision,
            "Order approval decided"
        );
        Ok(order)
    }

    /// 记录保险授权号
    pub async fn record_authorization(&self, order_id: Uuid, authorization_number: &str) -> Result<Order> {
        let authorization_number = authorization_number.trim();
        if authorization_number.is_empty() {
            return Err(ValidationFailure::EmptyAuthorization.into());
        }

        let mut order = self.load_order(order_id).await?;
        rules::check_pending(&order)?;
        order.authorization_number = Some(authorization_number.to_string());
        self.save_pending(&mut order).await?;

        info!(target: "audit", order_id = %order.id, "Insurance authorization recorded");
        Ok(order)
    }

    /// 指定或更换外部检验机构
    pub async fn assign_external_lab(&self, order_id: Uuid, lab_id: Uuid) -> Result<Order> {
        let mut order = self.load_order(order_id).await?;
        rules::check_pending(&order)?;
        let lab = self.require_active_lab(lab_id).await?;

        order.external_lab_id = Some(lab.id);
        self.save_pending(&mut order).await?;

        info!(order_number = %order.order_number, lab = %lab.code, "External lab assigned");
        Ok(order)
    }

    /// 记录标本采集时间
    pub async fn record_collection(&self, order_id: Uuid, collected_at: DateTime<Utc>) -> Result<Order> {
        if collected_at > Utc::now() {
            return Err(ValidationFailure::CollectionInFuture.into());
        }

        let mut order = self.load_order(order_id).await?;
        if order.status.is_terminal() {
            return Err(ClinlabError::InvalidStateTransition {
                from: order.status.to_string(),
                event: "RecordCollection".to_string(),
            });
        }

        order.collection_date = Some(collected_at);
        self.save_pending(&mut order).await?;
        Ok(order)
    }

    async fn save_pending(&self, order: &mut Order) -> Result<()> {
        order.updated_at = Utc::now();
        order.version = self.repository.update_order(order).await.map_err(|e| {
            self.record_conflict(&e);
            e
        })?;
        Ok(())
    }

    async fn require_active_lab(&self, lab_id: Uuid) -> Result<clinlab_core::ExternalLab> {
        match self.repository.get_external_lab(lab_id).await? {
            Some(lab) if lab.is_active => Ok(lab),
            _ => Err(ValidationFailure::ExternalLabUnavailable(lab_id).into()),
        }
    }
}
