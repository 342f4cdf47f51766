//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "recharge_dispatch_total",
        "Total number of recharge submissions to upstream platforms"
    );
    metrics::describe_histogram!(
        "recharge_dispatch_duration_seconds",
        "Upstream submission latency in seconds"
    );
    metrics::describe_counter!(
        "recharge_callbacks_total",
        "Total number of upstream callbacks by outcome"
    );
    metrics::describe_counter!("recharge_retries_total", "Total number of recharge retries");
    metrics::describe_counter!("notifications_total", "Total number of partner notifications");
    metrics::describe_counter!("refunds_total", "Total number of refund settlements");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last background worker iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次上游提交
#[inline]
pub fn record_dispatch(platform: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "recharge_dispatch_total",
        "platform" => platform.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "recharge_dispatch_duration_seconds",
        "platform" => platform.to_string()
    )
    .record(duration_secs);
}

/// 记录一次上游回调
#[inline]
pub fn record_callback(platform: &str, outcome: &str) {
    metrics::counter!(
        "recharge_callbacks_total",
        "platform" => platform.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次充值重试
#[inline]
pub fn record_retry(outcome: &str) {
    metrics::counter!("recharge_retries_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次通知推送
#[inline]
pub fn record_notification(platform: &str, outcome: &str) {
    metrics::counter!(
        "notifications_total",
        "platform" => platform.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次退款结算
#[inline]
pub fn record_refund(outcome: &str) {
    metrics::counter!("refunds_total", "outcome" => outcome.to_string()).increment(1);
}

/// 更新后台 worker 最近一次执行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
