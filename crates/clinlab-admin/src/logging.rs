//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unsupported log format '{}'", other)),
        }
    }
}

/// 构造过滤器，命令行级别优先于配置
pub fn build_filter(config: &LoggingConfig, level_override: Option<&str>) -> Result<EnvFilter> {
    let directives = level_override.unwrap_or(&config.level);
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter '{}'", directives))
}

/// 初始化全局 tracing 订阅者
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let filter = build_filter(config, level_override)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format.parse::<LogFormat>()? {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
