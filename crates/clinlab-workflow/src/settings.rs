//! 引擎运行参数

use clinlab_integration::QueueSettings;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 医嘱号前缀
    pub order_prefix: String,
    pub gateway_timeout: Duration,
    /// 危急警报单次投递的超时
    pub notification_timeout: Duration,
    /// 高危警报未确认多久后升级给主管
    pub escalation_window: Duration,
    /// 派生医嘱状态写回时遇到版本冲突的重试次数
    pub max_projection_retries: u32,
    pub notification_queue: QueueSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            order_prefix: "LAB".to_string(),
            gateway_timeout: Duration::from_secs(5),
            notification_timeout: Duration::from_secs(5),
            escalation_window: Duration::from_secs(15 * 60),
            max_projection_retries: 3,
            notification_queue: QueueSettings::default(),
        }
    }
}
