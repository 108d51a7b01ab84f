//! 检验引擎命令行工具

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use clinlab_admin::{init_tracing, ClinlabConfig, ConfigManager, DatabaseBackend};
use clinlab_core::{evaluate, ObservedValue, RangeSpec};
use clinlab_database::{DatabasePool, MemoryRepository, OrderRepository, PgRepository};
use clinlab_integration::{
    FileDocumentStore, HttpLabGateway, InterfaceResult, LogDispatcher, NotificationDispatcher,
    PermissiveClinicalService, StaticDirectory, WebhookDispatcher,
};
use clinlab_workflow::{Collaborators, OrderLifecycleManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "clinlab-server")]
#[command(about = "检验医嘱生命周期与结果分析引擎")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/clinlab.toml")]
    config: PathBuf,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建数据库表结构
    Migrate,
    /// 从 JSON 文件批量接收外部检验结果
    Ingest {
        /// 结果消息数组（JSON）
        file: PathBuf,
        /// 结束后输出指标
        #[arg(long)]
        metrics: bool,
    },
    /// 按参考范围与危急范围评估单个值
    Evaluate {
        value: String,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        critical: Option<String>,
    },
    /// 升级超时未确认的高危警报
    Escalate,
    /// 输出系统概览
    Overview,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(&args.config).await?;
    let config = manager.get_config().await;
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("Starting clinlab-server with {:?} backend", config.database.backend);

    match args.command {
        Command::Migrate => migrate(&config).await,
        Command::Ingest { file, metrics } => ingest(&config, file, metrics).await,
        Command::Evaluate { value, reference, critical } => {
            evaluate_value(&value, reference.as_deref(), critical.as_deref());
            Ok(())
        }
        Command::Escalate => escalate(&config).await,
        Command::Overview => overview(&config).await,
    }
}

async fn migrate(config: &ClinlabConfig) -> Result<()> {
    if config.database.backend != DatabaseBackend::Postgres {
        bail!("migrate requires the postgres backend");
    }
    let pool = DatabasePool::connect(&config.database.url, config.database.max_connections).await?;
    PgRepository::new(pool).migrate().await?;
    info!("Database schema is up to date");
    Ok(())
}

async fn ingest(config: &ClinlabConfig, file: PathBuf, print_metrics: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let batch: Vec<InterfaceResult> =
        serde_json::from_str(&content).context("Failed to parse interface results")?;

    let engine = build_engine(config).await?;
    info!("Ingesting {} interface results from {}", batch.len(), file.display());
    let outcome = engine.process_interface_batch(batch).await;
    engine.flush_notifications().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_complete() {
        warn!("{} interface results could not be processed", outcome.errors.len());
    }
    if print_metrics {
        println!("{}", engine.metrics().render()?);
    }
    Ok(())
}

fn evaluate_value(raw: &str, reference: Option<&str>, critical: Option<&str>) {
    let value = ObservedValue::parse(raw);
    let reference = reference.map(RangeSpec::new);
    let critical = critical.map(RangeSpec::new);

    for spec in reference.iter().chain(critical.iter()) {
        if !spec.is_evaluable() {
            warn!("Range '{}' cannot be evaluated", spec.raw());
        }
    }

    let flags = evaluate(&value, reference.as_ref(), critical.as_ref());
    println!("value:    {}", raw);
    println!("abnormal: {}", flags.abnormal);
    println!("critical: {}", flags.critical);
}

async fn escalate(config: &ClinlabConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    let escalated = engine.check_escalations(Utc::now()).await?;
    engine.flush_notifications().await;
    info!("Escalated {} critical alerts", escalated.len());
    println!("{}", serde_json::to_string_pretty(&escalated)?);
    Ok(())
}

async fn overview(config: &ClinlabConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    println!("{}", serde_json::to_string_pretty(&engine.overview().await?)?);
    Ok(())
}

async fn build_repository(config: &ClinlabConfig) -> Result<Arc<dyn OrderRepository>> {
    match config.database.backend {
        DatabaseBackend::Memory => Ok(Arc::new(MemoryRepository::new())),
        DatabaseBackend::Postgres => {
            let pool = DatabasePool::connect(&config.database.url, config.database.max_connections).await?;
            Ok(Arc::new(PgRepository::new(pool)))
        }
    }
}

fn build_dispatcher(url: Option<&str>, config: &ClinlabConfig) -> Result<Option<Arc<dyn NotificationDispatcher>>> {
    let Some(url) = url else {
        return Ok(None);
    };
    let timeout = Duration::from_millis(config.engine.notification_timeout_ms);
    let dispatcher = WebhookDispatcher::new(url, config.notifications.secret.clone(), timeout)?;
    Ok(Some(Arc::new(dispatcher)))
}

async fn build_engine(config: &ClinlabConfig) -> Result<OrderLifecycleManager> {
    let repository = build_repository(config).await?;
    let clinical = Arc::new(PermissiveClinicalService);

    let notifier = build_dispatcher(config.notifications.webhook_url.as_deref(), config)?
        .unwrap_or_else(|| Arc::new(LogDispatcher) as Arc<dyn NotificationDispatcher>);
    let fallback_notifier = build_dispatcher(config.notifications.fallback_webhook_url.as_deref(), config)?;

    let collaborators = Collaborators {
        repository,
        identity: Arc::new(StaticDirectory::new()),
        clinical_validation: clinical.clone(),
        clinical_record: clinical,
        gateway: Arc::new(HttpLabGateway::new(config.gateway_config())?),
        documents: Arc::new(FileDocumentStore::new(&config.documents.root)),
        notifier,
        fallback_notifier,
        order_numbers: None,
    };

    OrderLifecycleManager::new(collaborators, config.engine_settings()).map_err(|e| {
        error!("Failed to start lifecycle engine: {}", e);
        anyhow::Error::from(e)
    })
}
