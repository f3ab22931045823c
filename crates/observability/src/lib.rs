//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标 + 统计上报。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出（进程内只安装一次）
//! - `StatsReporter`：按 flow 输出统计记录到 stdout / 按日轮转文件 / gauge
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init_with_config, install_prometheus, StatsReporter};
//!
//! init_with_config(ObservabilityConfig::default())?;
//! install_prometheus("0.0.0.0:9000".parse()?)?;
//!
//! let reporter = StatsReporter::new("flow-a", true, None, MeasurementNames::default())?;
//! ```

pub mod metrics;
mod reporter;

use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-exports
pub use crate::metrics::{
    record_flow_restart, record_flow_status, record_output_setup_failure, record_reconcile,
    set_active_flows,
};
pub use crate::reporter::{metric_name, MeasurementNames, Measurements, StatsReporter};

/// 初始化 Tracing（JSON 格式，info 级别）
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// 默认日志级别（RUST_LOG 优先）
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            default_log_level: "info".to_string(),
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 使用自定义配置初始化 Tracing
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    match config.log_format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }

    tracing::info!(log_format = ?config.log_format, "Observability initialized");
    Ok(())
}

static PROMETHEUS_LISTEN: OnceLock<SocketAddr> = OnceLock::new();

/// Prometheus 安装结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusInstall {
    /// 本次调用完成安装
    Installed,
    /// 已在该地址安装（地址不同需重启进程才能生效）
    AlreadyInstalled(SocketAddr),
}

/// 安装 Prometheus 导出器
///
/// 全局 recorder 只能安装一次，之后的调用只返回已有地址。
pub fn install_prometheus(listen: SocketAddr) -> Result<PrometheusInstall> {
    if let Some(existing) = PROMETHEUS_LISTEN.get() {
        if *existing != listen {
            tracing::warn!(
                current = %existing,
                requested = %listen,
                "Prometheus listen address change requires a restart"
            );
        }
        return Ok(PrometheusInstall::AlreadyInstalled(*existing));
    }

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("Failed to install Prometheus recorder")?;
    // A concurrent installer would have failed in install() above
    let _ = PROMETHEUS_LISTEN.set(listen);

    tracing::info!(listen = %listen, "Prometheus metrics endpoint initialized");
    Ok(PrometheusInstall::Installed)
}

/// 当前 Prometheus 监听地址
pub fn prometheus_listen() -> Option<SocketAddr> {
    PROMETHEUS_LISTEN.get().copied()
}
