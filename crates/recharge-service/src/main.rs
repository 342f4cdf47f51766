//! 话费充值履约服务
//!
//! 同一进程内运行 HTTP 接口、充值 worker 与重试扫描，共享连接池和队列。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, middleware, routing::get};
use recharge_service::api::{self, AppState};
use recharge_service::lock::{LockConfig, LockManager, RedisLock};
use recharge_service::platform::PlatformRegistry;
use recharge_service::service::{Repositories, Services};
use recharge_service::worker::{RechargeWorker, RetryWorker};
use recharge_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
    queue::{Queue, RedisQueue},
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const SERVICE_NAME: &str = "recharge-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.observability).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    // 启动时数据库可能尚未就绪，按退避重连
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
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let cache = Arc::new(Cache::new(&config.redis)?);
    let queue: Arc<dyn Queue> = Arc::new(RedisQueue::new(cache.client().clone()));
    let locks = Arc::new(LockManager::new(
        Arc::new(RedisLock::new(
            Some(cache.client().clone()),
            db.pool().clone(),
        )),
        LockConfig::from(&config.lock),
    ));

    let registry = Arc::new(PlatformRegistry::from_config(&config.platforms)?);

    let services = Services::build(
        Repositories::postgres(db.pool().clone()),
        registry,
        queue.clone(),
        locks,
        &config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let recharge_worker = RechargeWorker::new(
        services.dispatch.clone(),
        queue,
        config.queue.recharge_queue.clone(),
        config.queue.pop_timeout(),
    );
    let recharge_handle = tokio::spawn(recharge_worker.run(shutdown_rx.clone()));

    let retry_worker = RetryWorker::new(
        services.dispatch.clone(),
        services.retry.clone(),
        &config.worker,
    );
    let retry_handle = tokio::spawn(retry_worker.run(shutdown_rx));

    let state = AppState::new(services, cache.clone(), config.partner.clone());

    let app = Router::new()
        .merge(api::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db.clone();
                let cache_for_ready = cache.clone();
                move || readiness_check(db_for_ready.clone(), cache_for_ready.clone())
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP 停止后通知后台任务，等待当前任务处理完
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("recharge_worker", recharge_handle), ("retry_worker", retry_handle)] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "后台任务异常退出");
        }
    }
    db.close().await;

    info!("Server shutdown complete");
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

/// 就绪探针：检查数据库和 Redis 连接是否可用
async fn readiness_check(db: Database, cache: Arc<Cache>) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = cache.health_check().await.is_ok();
    let all_ok = db_ok && cache_ok;

    Json(serde_json::json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "service": SERVICE_NAME,
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
