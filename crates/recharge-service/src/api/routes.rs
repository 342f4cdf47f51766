//! 路由配置

use axum::{Router, routing::post};

use crate::api::{handlers, state::AppState};

/// 合作方下单与查单
fn partner_routes() -> Router<AppState> {
    Router::new()
        .route("/external/orders", post(handlers::external::create_order))
        .route("/external/orders/query", post(handlers::external::query_order))
        .route(
            "/kekebang/{account_name}/orders",
            post(handlers::kekebang::create_order),
        )
        .route(
            "/kekebang/{account_name}/query",
            post(handlers::kekebang::query_order),
        )
        .route("/mf178/order/{userid}", post(handlers::mf178::create_order))
        .route(
            "/mf178/order/{userid}/query",
            post(handlers::mf178::query_order),
        )
}

/// 上游回调
fn callback_routes() -> Router<AppState> {
    Router::new().route("/callback/{platform}", post(handlers::callback::receive))
}

/// 运营操作
fn operator_routes() -> Router<AppState> {
    Router::new().route("/orders/{id}/refund", post(handlers::refund::refund_order))
}

/// 全部业务路由，挂载在 /api/v1 下
pub fn api_routes() -> Router<AppState> {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .merge(partner_routes())
            .merge(callback_routes())
            .merge(operator_routes()),
    )
}
