//! 医嘱前置条件规则
//!
//! 纯函数，不访问存储，方便单独验证提交与取消的约束。

use clinlab_core::{ApprovalStatus, LabTest, Order, OrderStatus, ValidationFailure};

/// 提交前检查：先审批，后空腹
///
/// `tests` 为医嘱明细引用的检验项目。保险授权需要外部判断，不在此处检查。
pub fn check_submission(order: &Order, tests: &[LabTest]) -> Result<(), ValidationFailure> {
    if order.requires_approval && order.approval_status != ApprovalStatus::Approved {
        return Err(ValidationFailure::ApprovalRequired {
            status: order.approval_status.to_string(),
        });
    }

    if !order.is_fasting {
        let fasting_test = order
            .items
            .iter()
            .filter_map(|item| tests.iter().find(|t| t.id == item.test_id))
            .find(|test| test.requires_fasting);
        if let Some(test) = fasting_test {
            return Err(ValidationFailure::FastingRequired {
                test: test.name.clone(),
            });
        }
    }

    Ok(())
}

/// 整单取消检查：只允许 Pending/Submitted，且尚无任何结果
pub fn check_cancellation(order: &Order, has_results: bool) -> Result<(), ValidationFailure> {
    match order.status {
        OrderStatus::Pending | OrderStatus::Submitted => {}
        other => {
            return Err(ValidationFailure::CancellationNotAllowed(format!(
                "order is {}",
                other
            )))
        }
    }

    if has_results || order.has_results() {
        return Err(ValidationFailure::CancellationNotAllowed(
            "results have already been recorded".to_string(),
        ));
    }

    Ok(())
}

/// 审批操作检查：医嘱待提交、需要审批且尚在审批中
pub fn check_approval_pending(order: &Order) -> Result<(), ValidationFailure> {
    if order.status != OrderStatus::Pending {
        return Err(ValidationFailure::OrderNotPending);
    }
    if !order.requires_approval || order.approval_status != ApprovalStatus::Pending {
        return Err(ValidationFailure::ApprovalNotPending);
    }
    Ok(())
}

/// 待提交状态下才允许修改医嘱
pub fn check_pending(order: &Order) -> Result<(), ValidationFailure> {
    if order.status == OrderStatus::Pending {
        Ok(())
    } else {
        Err(ValidationFailure::OrderNotPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clinlab_core::{OrderItem, OrderItemStatus, OrderPriority, ResultStatus, SpecimenInfo};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn lab_test(requires_fasting: bool) -> LabTest {
        LabTest {
            id: Uuid::new_v4(),
            code: "GLU".into(),
            name: if requires_fasting { "Fasting Glucose".into() } else { "CBC".into() },
            category: "Chemistry".into(),
            department: None,
            specimen_type: None,
            requires_fasting,
            reference_range: None,
            critical_range: None,
            units: None,
            is_active: true,
            components: vec![],
        }
    }

    fn order_for(tests: &[LabTest], requires_approval: bool, approval_status: ApprovalStatus, is_fasting: bool) -> Order {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Order {
            id,
            order_number: "LAB202401010001".into(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            encounter_id: None,
            order_date: now,
            collection_date: None,
            status: OrderStatus::Pending,
            priority: OrderPriority::Routine,
            clinical_notes: None,
            diagnosis_codes: vec![],
            is_fasting,
            specimen: SpecimenInfo::default(),
            external_lab_id: None,
            external_order_id: None,
            requires_approval,
            approval_status,
            approved_by: None,
            approval_date: None,
            approval_notes: None,
            authorization_number: None,
            cancellation_reason: None,
            items: tests
                .iter()
                .map(|t| OrderItem {
                    id: Uuid::new_v4(),
                    order_id: id,
                    test_id: t.id,
                    status: OrderItemStatus::Pending,
                    priority: OrderPriority::Routine,
                    special_instructions: None,
                    is_abnormal: false,
                    is_critical: false,
                    result_status: None,
                })
                .collect(),
            documents: vec![],
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn approval_status() -> impl Strategy<Value = ApprovalStatus> {
        prop_oneof![
            Just(ApprovalStatus::NotRequired),
            Just(ApprovalStatus::Pending),
            Just(ApprovalStatus::Approved),
            Just(ApprovalStatus::Rejected),
        ]
    }

    #[test]
    fn test_fasting_required() {
        let tests = vec![lab_test(false), lab_test(true)];
        let order = order_for(&tests, false, ApprovalStatus::NotRequired, false);
        assert_eq!(
            check_submission(&order, &tests),
            Err(ValidationFailure::FastingRequired { test: "Fasting Glucose".into() })
        );

        let order = order_for(&tests, false, ApprovalStatus::NotRequired, true);
        assert!(check_submission(&order, &tests).is_ok());
    }

    #[test]
    fn test_approval_checked_before_fasting() {
        let tests = vec![lab_test(true)];
        let order = order_for(&tests, true, ApprovalStatus::Pending, false);
        assert!(matches!(
            check_submission(&order, &tests),
            Err(ValidationFailure::ApprovalRequired { .. })
        ));
    }

    #[test]
    fn test_cancellation_rules() {
        let tests = vec![lab_test(false)];
        let mut order = order_for(&tests, false, ApprovalStatus::NotRequired, false);
        assert!(check_cancellation(&order, false).is_ok());
        assert!(check_cancellation(&order, true).is_err());

        order.items[0].result_status = Some(ResultStatus::PendingReview);
        assert!(check_cancellation(&order, false).is_err());

        order.items[0].result_status = None;
        order.status = OrderStatus::ResultsPending;
        assert!(matches!(
            check_cancellation(&order, false),
            Err(ValidationFailure::CancellationNotAllowed(_))
        ));
    }

    #[test]
    fn test_approval_pending_rules() {
        let tests = vec![lab_test(false)];
        let order = order_for(&tests, true, ApprovalStatus::Pending, false);
        assert!(check_approval_pending(&order).is_ok());

        let order = order_for(&tests, false, ApprovalStatus::NotRequired, false);
        assert_eq!(check_approval_pending(&order), Err(ValidationFailure::ApprovalNotPending));

        let mut order = order_for(&tests, true, ApprovalStatus::Pending, false);
        order.status = OrderStatus::Submitted;
        assert_eq!(check_approval_pending(&order), Err(ValidationFailure::OrderNotPending));
    }

    proptest! {
        #[test]
        fn submission_requires_approval_and_fasting(
            requires_approval in any::<bool>(),
            status in approval_status(),
            is_fasting in any::<bool>(),
            fasting_flags in proptest::collection::vec(any::<bool>(), 1..5),
        ) {
            let tests: Vec<LabTest> = fasting_flags.iter().map(|f| lab_test(*f)).collect();
            let order = order_for(&tests, requires_approval, status, is_fasting);
            let outcome = check_submission(&order, &tests);

            let approval_ok = !requires_approval || status == ApprovalStatus::Approved;
            let fasting_ok = is_fasting || !fasting_flags.iter().any(|f| *f);

            prop_assert_eq!(outcome.is_ok(), approval_ok && fasting_ok);
            if !approval_ok {
                let is_approval_failure = matches!(outcome, Err(ValidationFailure::ApprovalRequired { .. }));
                prop_assert!(is_approval_failure);
            }
        }
    }
}
