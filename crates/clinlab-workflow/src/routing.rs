//! 院内检验路由规则
//!
//! 根据检验类别、标本类型和医嘱优先级决定由哪个检验科室承接

use clinlab_core::{LabTest, OrderPriority};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 默认科室
pub const DEFAULT_DEPARTMENT: &str = "general_lab";

/// 路由规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    pub is_active: bool,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, priority: i32, conditions: Vec<RuleCondition>, action: RuleAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            priority,
            conditions,
            action,
            is_active: true,
        }
    }
}

/// 规则条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleCondition {
    CategoryEquals(String),     // 检验类别等于
    CategoryIn(Vec<String>),    // 检验类别在列表中
    SpecimenTypeEquals(String), // 标本类型等于
    Stat,                       // 急查
    Routine,                    // 常规
}

/// 规则动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleAction {
    QueueInDepartment(String), // 加入科室队列
}

/// 路由结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub department: String,
    pub rule_applied: Option<Uuid>,
    pub reason: String,
}

/// 科室路由器
#[derive(Debug, Default)]
pub struct DepartmentRouter {
    rules: Vec<RoutingRule>,
}

impl DepartmentRouter {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 常用检验科室的默认规则
    pub fn with_default_rules() -> Self {
        let mut router = Self::new();
        router.add_rule(RoutingRule::new(
            "Stat chemistry to core lab",
            100,
            vec![
                RuleCondition::Stat,
                RuleCondition::CategoryIn(vec!["Chemistry".into(), "Hematology".into()]),
            ],
            RuleAction::QueueInDepartment("stat_lab".into()),
        ));
        router.add_rule(RoutingRule::new(
            "Microbiology",
            50,
            vec![RuleCondition::CategoryEquals("Microbiology".into())],
            RuleAction::QueueInDepartment("microbiology".into()),
        ));
        router.add_rule(RoutingRule::new(
            "Urinalysis",
            40,
            vec![RuleCondition::SpecimenTypeEquals("Urine".into())],
            RuleAction::QueueInDepartment("urinalysis".into()),
        ));
        router
    }

    /// 添加路由规则
    pub fn add_rule(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
        // 按优先级排序
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// 为单个检验项目选择科室
    pub fn route(&self, test: &LabTest, priority: OrderPriority) -> RoutingDecision {
        for rule in self.rules.iter().filter(|r| r.is_active) {
            if rule
                .conditions
                .iter()
                .all(|condition| Self::evaluate_condition(condition, test, priority))
            {
                let RuleAction::QueueInDepartment(department) = &rule.action;
                return RoutingDecision {
                    department: department.clone(),
                    rule_applied: Some(rule.id),
                    reason: format!("Queued in {} by rule {}", department, rule.name),
                };
            }
        }

        // 没有规则匹配时使用项目自带科室
        let department = test
            .department
            .clone()
            .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string());
        RoutingDecision {
            department,
            rule_applied: None,
            reason: "Default routing applied".to_string(),
        }
    }

    fn evaluate_condition(condition: &RuleCondition, test: &LabTest, priority: OrderPriority) -> bool {
        match condition {
            RuleCondition::CategoryEquals(category) => test.category.eq_ignore_ascii_case(category),
            RuleCondition::CategoryIn(categories) => categories
                .iter()
                .any(|category| test.category.eq_ignore_ascii_case(category)),
            RuleCondition::SpecimenTypeEquals(specimen) => test
                .specimen_type
                .as_deref()
                .map_or(false, |s| s.eq_ignore_ascii_case(specimen)),
            RuleCondition::Stat => priority == OrderPriority::Stat,
            RuleCondition::Routine => priority == OrderPriority::Routine,
        }
    }
}
