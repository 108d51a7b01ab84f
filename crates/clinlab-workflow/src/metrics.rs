//! 引擎运行指标

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// 引擎指标，注册在独立的 Registry 中
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    pub orders_created: IntCounter,
    pub orders_submitted: IntCounter,
    pub orders_cancelled: IntCounter,
    pub gateway_failures: IntCounter,
    pub results_recorded: IntCounter,
    pub critical_alerts: IntCounter,
    pub unresolved_critical_alerts: IntGauge,
    pub unmatched_results: IntCounter,
    pub batch_failures: IntCounter,
    pub concurrency_conflicts: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| IntCounter::with_opts(Opts::new(name, help).namespace("clinlab"));

        let orders_created = counter("orders_created_total", "Lab orders created")?;
        let orders_submitted = counter("orders_submitted_total", "Lab orders submitted")?;
        let orders_cancelled = counter("orders_cancelled_total", "Lab orders cancelled")?;
        let gateway_failures = counter("gateway_failures_total", "Lab gateway call failures")?;
        let results_recorded = counter("results_recorded_total", "Lab results recorded")?;
        let critical_alerts = counter("critical_alerts_total", "Critical value alerts raised")?;
        let unmatched_results = counter("unmatched_results_total", "Interface results without a matching order")?;
        let batch_failures = counter("batch_failures_total", "Interface batch items that failed")?;
        let concurrency_conflicts = counter("concurrency_conflicts_total", "Optimistic concurrency conflicts")?;
        let unresolved_critical_alerts = IntGauge::with_opts(
            Opts::new("unresolved_critical_alerts", "Critical alerts with an undelivered recipient")
                .namespace("clinlab"),
        )?;

        registry.register(Box::new(orders_created.clone()))?;
        registry.register(Box::new(orders_submitted.clone()))?;
        registry.register(Box::new(orders_cancelled.clone()))?;
        registry.register(Box::new(gateway_failures.clone()))?;
        registry.register(Box::new(results_recorded.clone()))?;
        registry.register(Box::new(critical_alerts.clone()))?;
        registry.register(Box::new(unresolved_critical_alerts.clone()))?;
        registry.register(Box::new(unmatched_results.clone()))?;
        registry.register(Box::new(batch_failures.clone()))?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            orders_submitted,
            orders_cancelled,
            gateway_failures,
            results_recorded,
            critical_alerts,
            unresolved_critical_alerts,
            unmatched_results,
            batch_failures,
            concurrency_conflicts,
        })
    }

    /// Prometheus 文本格式输出
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
