//! 检验医嘱生命周期演示程序
//!
//! 在内存仓储上走完一遍：开单、提交、录入危急结果、审核。

use anyhow::Result;
use clinlab::core::{
    LabTest, OrderItemRequest, OrderRequest, RangeSpec, ResultRequest, ResultValueRequest,
    TestComponent,
};
use clinlab::database::{MemoryRepository, OrderRepository};
use clinlab::integration::{
    HttpGatewayConfig, HttpLabGateway, LogDispatcher, MemoryDocumentStore,
    PermissiveClinicalService, StaticDirectory,
};
use clinlab::{Collaborators, EngineSettings, OrderLifecycleManager};
use std::sync::Arc;
use uuid::Uuid;

fn potassium_panel() -> LabTest {
    let id = Uuid::new_v4();
    LabTest {
        id,
        code: "K".into(),
        name: "Potassium".into(),
        category: "Chemistry".into(),
        department: Some("chemistry".into()),
        specimen_type: Some("Blood".into()),
        requires_fasting: false,
        reference_range: None,
        critical_range: None,
        units: Some("mmol/L".into()),
        is_active: true,
        components: vec![TestComponent {
            id: Uuid::new_v4(),
            test_id: id,
            code: "K".into(),
            name: "Potassium".into(),
            units: Some("mmol/L".into()),
            reference_range: Some(RangeSpec::new("3.5-5.0")),
            critical_range: Some(RangeSpec::new("<2.5 OR >6.5")),
            display_order: 1,
            is_required: true,
            calculation_formula: None,
            trend_tolerance: 0.1,
        }],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("🧪 检验医嘱生命周期演示");
    println!("================================");

    let repository: Arc<dyn OrderRepository> = Arc::new(MemoryRepository::new());
    let directory = Arc::new(StaticDirectory::new());
    let patient = Uuid::new_v4();
    let provider = Uuid::new_v4();
    directory.register_patient(patient).await;
    directory.register_provider(provider).await;

    let potassium = potassium_panel();
    repository.upsert_test(&potassium).await?;

    let clinical = Arc::new(PermissiveClinicalService);
    let gateway = HttpLabGateway::new(HttpGatewayConfig {
        endpoint: "http://localhost:8090/api/v1".into(),
        timeout_ms: 5_000,
        authentication: Default::default(),
    })?;

    let engine = OrderLifecycleManager::new(
        Collaborators {
            repository: repository.clone(),
            identity: directory,
            clinical_validation: clinical.clone(),
            clinical_record: clinical,
            gateway: Arc::new(gateway),
            documents: Arc::new(MemoryDocumentStore::new()),
            notifier: Arc::new(LogDispatcher),
            fallback_notifier: None,
            order_numbers: None,
        },
        EngineSettings::default(),
    )?;

    println!("\n📝 开单并提交...");
    let order = engine
        .create_order(OrderRequest {
            patient_id: patient,
            provider_id: provider,
            tests: vec![OrderItemRequest::new(potassium.id)],
            ..OrderRequest::default()
        })
        .await?;
    let order = engine.submit_order(order.id).await?;
    println!("  医嘱号: {} 状态: {}", order.order_number, order.status);

    for item in engine.department_queue("chemistry").await {
        println!("  科室队列: {} {} ({:?})", item.order_number, item.test_name, item.priority);
    }

    println!("\n🔬 录入结果 K = 7.2 mmol/L...");
    let recording = engine
        .record_result(ResultRequest {
            order_item_id: order.items[0].id,
            performing_lab: Some("Core Lab".into()),
            values: vec![ResultValueRequest::new(potassium.components[0].id, "7.2")],
            ..ResultRequest::default()
        })
        .await?;
    for value in recording.result.values() {
        println!(
            "  {} = {} 异常: {} 危急: {} 趋势: {:?}",
            value.component_code, value.raw_value, value.is_abnormal, value.is_critical, value.trend
        );
    }
    for raised in &recording.critical_alerts {
        println!("  🚨 危急警报 {} 投递状态: {:?}", raised.alert.id, raised.delivery);
    }
    println!("  医嘱状态: {}", recording.order_status);

    println!("\n✅ 审核结果...");
    let reviewed = engine.review_result(recording.result.id, provider).await?;
    println!("  结果状态: {:?}", reviewed.status);

    for raised in &recording.critical_alerts {
        engine.acknowledge_alert(raised.alert.id, provider).await?;
    }
    engine.flush_notifications().await;

    let overview = engine.overview().await?;
    println!("\n📊 系统概览");
    println!("{}", serde_json::to_string_pretty(&overview)?);

    println!("\n📈 指标");
    println!("{}", engine.metrics().render()?);

    Ok(())
}
