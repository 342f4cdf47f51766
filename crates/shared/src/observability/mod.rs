//! 日志、追踪与指标
//!
//! 两个进程在 main 的第一步调用 `init`，返回的守卫要活到进程退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// 由 `AppConfig::load` 回填为进程名
    #[serde(default)]
    pub service_name: String,

    /// 为空时只输出日志，不导出 span
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// RUST_LOG 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// drop 时刷新未导出的 span 并停止指标端口
pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsHandle>,
    _tracing: Option<tracing::TracingGuard>,
}

impl ObservabilityGuard {
    pub fn empty() -> Self {
        Self {
            _metrics: None,
            _tracing: None,
        }
    }
}

/// 先装 tracing subscriber，再装 Prometheus recorder，指标端口启动失败时已经能看到日志
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;
    let metrics_handle = metrics::init(config).await?;

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_port,
        otlp = config.otlp_endpoint.is_some(),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard {
        _metrics: Some(metrics_handle),
        _tracing: Some(tracing_guard),
    })
}
