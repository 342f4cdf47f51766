//! 通知 worker 进程
//!
//! 运行通知任务池，另开一个只有健康检查的 HTTP 端口。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, routing::get};
use notification_worker::sender::HttpSender;
use notification_worker::task::{NotificationTask, TaskSettings};
use notification_worker::templates::TemplateEngine;
use recharge_service::service::Repositories;
use recharge_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    observability,
    queue::{Queue, RedisQueue},
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "notification-worker";

/// 单次推送的 HTTP 超时
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.observability).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    let connect_policy = RetryPolicy {
        max_retries: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
    };
    let db = retry_with_policy(&connect_policy, "database_connect", |_| true, || {
        Database::connect(&config.database)
    })
    .await?;

    let cache = Arc::new(Cache::new(&config.redis)?);
    let queue: Arc<dyn Queue> = Arc::new(RedisQueue::new(cache.client().clone()));
    let repos = Repositories::postgres(db.pool().clone());

    let task = Arc::new(NotificationTask::new(
        repos.notifications,
        repos.accounts,
        Arc::new(HttpSender::new(PUSH_TIMEOUT)?),
        TemplateEngine::from_platforms(&config.platforms),
        queue,
        TaskSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_handle = tokio::spawn(task.run(shutdown_rx));

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db.clone();
                let cache_for_ready = cache.clone();
                move || readiness_check(db_for_ready.clone(), cache_for_ready.clone())
            }),
        );

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = task_handle.await {
        error!(error = %e, "通知任务异常退出");
    }
    db.close().await;

    info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

async fn readiness_check(db: Database, cache: Arc<Cache>) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = cache.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok && cache_ok { "ok" } else { "degraded" },
        "service": SERVICE_NAME,
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
