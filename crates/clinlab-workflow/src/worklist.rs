//! 检验科室工作队列
//!
//! 院内承接的医嘱按明细进入科室队列，同时按科室生成工作单。

use chrono::{DateTime, Utc};
use clinlab_core::{LabTest, Order, OrderPriority, SpecimenInfo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// 工作项状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkItemStatus {
    Queued,   // 待检测
    Resulted, // 已出结果
}

/// 工作项（一个医嘱明细）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub order_number: String,
    pub test_code: String,
    pub test_name: String,
    pub department: String,
    pub priority: OrderPriority,
    pub status: WorkItemStatus,
    pub queued_at: DateTime<Utc>,
    pub resulted_at: Option<DateTime<Utc>>,
}

/// 科室工作单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worksheet {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub department: String,
    pub work_item_ids: Vec<Uuid>,
    pub specimen: SpecimenInfo,
    pub is_fasting: bool,
    pub created_at: DateTime<Utc>,
}

/// 单个明细的科室分配
#[derive(Debug, Clone)]
pub struct Assignment<'a> {
    pub order_item_id: Uuid,
    pub priority: OrderPriority,
    pub test: &'a LabTest,
    pub department: String,
}

/// 工作队列统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkQueueStats {
    pub total_items: usize,
    pub queued_items: usize,
    pub resulted_items: usize,
    pub depth_by_department: BTreeMap<String, usize>,
}

/// 检验工作队列
#[derive(Debug, Default)]
pub struct LabWorkQueue {
    items: HashMap<Uuid, WorkItem>,
    worksheets: HashMap<Uuid, Worksheet>,
    order_items: HashMap<Uuid, Vec<Uuid>>, // order_id -> work_item_ids
}

impl LabWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为医嘱创建工作项，并按科室生成工作单
    pub fn enqueue(&mut self, order: &Order, assignments: &[Assignment<'_>]) -> Vec<Worksheet> {
        let now = Utc::now();
        let mut by_department: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();

        for assignment in assignments {
            let work_item = WorkItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                order_item_id: assignment.order_item_id,
                order_number: order.order_number.clone(),
                test_code: assignment.test.code.clone(),
                test_name: assignment.test.name.clone(),
                department: assignment.department.clone(),
                priority: assignment.priority,
                status: WorkItemStatus::Queued,
                queued_at: now,
                resulted_at: None,
            };

            by_department
                .entry(assignment.department.clone())
                .or_default()
                .push(work_item.id);
            self.order_items
                .entry(order.id)
                .or_default()
                .push(work_item.id);
            self.items.insert(work_item.id, work_item);
        }

        let worksheets: Vec<Worksheet> = by_department
            .into_iter()
            .map(|(department, work_item_ids)| Worksheet {
                id: Uuid::new_v4(),
                order_id: order.id,
                order_number: order.order_number.clone(),
                department,
                work_item_ids,
                specimen: order.specimen.clone(),
                is_fasting: order.is_fasting,
                created_at: now,
            })
            .collect();

        for worksheet in &worksheets {
            tracing::info!(
                "Created worksheet {} for order {} in {}",
                worksheet.id,
                order.order_number,
                worksheet.department
            );
            self.worksheets.insert(worksheet.id, worksheet.clone());
        }

        worksheets
    }

    /// 科室待检测队列，急查在前
    pub fn department_queue(&self, department: &str) -> Vec<&WorkItem> {
        let mut queue: Vec<&WorkItem> = self
            .items
            .values()
            .filter(|item| item.department == department && item.status == WorkItemStatus::Queued)
            .collect();
        queue.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.queued_at.cmp(&b.queued_at)));
        queue
    }

    pub fn worksheets_for_order(&self, order_id: Uuid) -> Vec<&Worksheet> {
        self.worksheets
            .values()
            .filter(|w| w.order_id == order_id)
            .collect()
    }

    /// 明细出结果后标记工作项
    pub fn mark_resulted(&mut self, order_item_id: Uuid) -> bool {
        match self
            .items
            .values_mut()
            .find(|item| item.order_item_id == order_item_id)
        {
            Some(item) => {
                item.status = WorkItemStatus::Resulted;
                item.resulted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// 医嘱取消时移除其全部工作项与工作单
    pub fn remove_order(&mut self, order_id: Uuid) -> usize {
        let removed = self.order_items.remove(&order_id).unwrap_or_default();
        for id in &removed {
            self.items.remove(id);
        }
        self.worksheets.retain(|_, w| w.order_id != order_id);
        if !removed.is_empty() {
            tracing::info!("Removed {} work items for order {}", removed.len(), order_id);
        }
        removed.len()
    }

    pub fn stats(&self) -> WorkQueueStats {
        let mut stats = WorkQueueStats {
            total_items: self.items.len(),
            ..Default::default()
        };

        for item in self.items.values() {
            match item.status {
                WorkItemStatus::Queued => {
                    stats.queued_items += 1;
                    *stats
                        .depth_by_department
                        .entry(item.department.clone())
                        .or_insert(0) += 1;
                }
                WorkItemStatus::Resulted => stats.resulted_items += 1,
            }
        }

        stats
    }
}
