//! HTTP 接口集成测试
//!
//! 路由挂在内存版服务上，请求经 `tower::ServiceExt::oneshot` 直接送进 Router。

mod common;

use std::sync::Arc;

use recharge_shared::queue::Queue;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{
    CUSTOMER_ID, EXTERNAL_APP_KEY, EXTERNAL_SECRET, Harness, KEKEBANG_ACCOUNT_NAME,
    KEKEBANG_APP_KEY, KEKEBANG_SECRET, MF178_ACCOUNT_NAME, MF178_APP_KEY, MF178_SECRET, Submit,
    callback_body, dec,
};
use recharge_service::api::{AppState, MemoryNonceStore, api_routes};
use recharge_service::models::OrderStatus;
use recharge_service::platform::DispatchMode;
use recharge_service::signature::{canonical_sign, kekebang_sign, mf178_sign, params_from_json};
use recharge_shared::config::PartnerConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    let state = AppState::new(
        h.services.clone(),
        Arc::new(MemoryNonceStore::new()),
        PartnerConfig::default(),
    );
    api_routes().with_state(state)
}

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let (status, raw) = post(app, uri, body.to_string()).await;
    (status, serde_json::from_str(&raw).unwrap())
}

fn sign_with(mut body: Value, sign: impl Fn(&Value) -> String) -> Value {
    let signature = sign(&body);
    body["sign"] = Value::String(signature);
    body
}

fn external_order(out_trade_num: &str, nonce: &str) -> Value {
    let body = json!({
        "app_id": EXTERNAL_APP_KEY,
        "mobile": "13800138000",
        "product_id": 1,
        "out_trade_num": out_trade_num,
        "amount": "50",
        "notify_url": "https://partner.test/notify",
        "timestamp": Utc::now().timestamp(),
        "nonce": nonce,
    });
    sign_with(body, |b| {
        canonical_sign(&params_from_json(b.as_object().unwrap()), EXTERNAL_SECRET)
    })
}

fn kekebang_order(user_order_id: &str) -> Value {
    let body = json!({
        "app_key": KEKEBANG_APP_KEY,
        "user_order_id": user_order_id,
        "target": "13900139000",
        "outer_goods_code": "1",
        "goods_id": 88,
        "goods_name": "移动50元",
        "datas": { "amount": "50", "operator_id": "移动", "prov_code": "44" },
        "timestamp": Utc::now().timestamp(),
    });
    sign_with(body, |b| {
        kekebang_sign(&params_from_json(b.as_object().unwrap()), KEKEBANG_SECRET)
    })
}

fn mf178_order(user_order_id: i64) -> Value {
    let body = json!({
        "app_key": MF178_APP_KEY,
        "user_order_id": user_order_id,
        "datas": { "operator_id": "移动", "prov_code": "广东", "amount": 50 },
        "vender_id": 3,
        "target": "13700137000",
        "goods_id": 12,
        "goods_name": "移动50元",
        "outer_goods_code": "1",
        "official_payment": "50",
        "user_quote_type": 1,
        "user_quote_payment": "49",
        "user_payment": 49,
        "timestamp": Utc::now().timestamp(),
    });
    sign_with(body, |b| {
        mf178_sign(&params_from_json(b.as_object().unwrap()), MF178_SECRET)
    })
}

// ==================== 外部 API ====================

#[tokio::test]
async fn test_external_create_order() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);

    let (status, body) =
        post_json(&app, "/api/v1/external/orders", &external_order("API-1", "n-1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["out_trade_num"], "API-1");
    assert_eq!(body["data"]["status"], 2);
    assert!(body["data"]["order_number"].as_str().unwrap().len() > 10);
    assert_eq!(h.queue.length("recharge_queue").await.unwrap(), 1);
}

#[tokio::test]
async fn test_external_duplicate_returns_existing_order() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);

    let (_, first) =
        post_json(&app, "/api/v1/external/orders", &external_order("API-2", "n-1")).await;
    let (status, second) =
        post_json(&app, "/api/v1/external/orders", &external_order("API-2", "n-2")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["code"], 409);
    assert_eq!(second["data"]["order_number"], first["data"]["order_number"]);
    assert_eq!(h.orders.count(), 1);
    assert_eq!(h.queue.length("recharge_queue").await.unwrap(), 1);
}

#[tokio::test]
async fn test_external_nonce_cannot_be_replayed() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let request = external_order("API-3", "n-same");

    let (status, _) = post_json(&app, "/api/v1/external/orders", &request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&app, "/api/v1/external/orders", &request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn test_external_bad_signature_is_unauthorized() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let mut request = external_order("API-4", "n-1");
    request["amount"] = json!("100");

    let (status, _) = post_json(&app, "/api/v1/external/orders", &request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.orders.count(), 0);
}

#[tokio::test]
async fn test_external_expired_timestamp_is_unauthorized() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let mut request = external_order("API-5", "n-1");
    request["timestamp"] = json!(Utc::now().timestamp() - 3600);
    let request = sign_with(request, |b| {
        canonical_sign(&params_from_json(b.as_object().unwrap()), EXTERNAL_SECRET)
    });

    let (status, body) = post_json(&app, "/api/v1/external/orders", &request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("过期"));
}

#[tokio::test]
async fn test_external_unknown_app_is_unauthorized() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let mut request = external_order("API-6", "n-1");
    request["app_id"] = json!("nobody");

    let (status, _) = post_json(&app, "/api/v1/external/orders", &request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_external_invalid_mobile_is_bad_request() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let mut request = external_order("API-7", "n-1");
    request["mobile"] = json!("12345");
    let request = sign_with(request, |b| {
        canonical_sign(&params_from_json(b.as_object().unwrap()), EXTERNAL_SECRET)
    });

    let (status, body) = post_json(&app, "/api/v1/external/orders", &request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_external_query_order() {
    let h = Harness::new(DispatchMode::Sync);
    h.platform.always(Submit::Succeed);
    let app = app(&h);
    post_json(&app, "/api/v1/external/orders", &external_order("API-8", "n-1")).await;

    let query = sign_with(
        json!({
            "app_id": EXTERNAL_APP_KEY,
            "out_trade_num": "API-8",
            "timestamp": Utc::now().timestamp(),
            "nonce": "n-2",
        }),
        |b| canonical_sign(&params_from_json(b.as_object().unwrap()), EXTERNAL_SECRET),
    );
    let (status, body) = post_json(&app, "/api/v1/external/orders/query", &query).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], 4);
    assert!(body["data"]["finished_at"].is_string());
}

// ==================== 客客帮 ====================

#[tokio::test]
async fn test_kekebang_create_order() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let uri = format!("/api/v1/kekebang/{KEKEBANG_ACCOUNT_NAME}/orders");

    let (status, body) = post_json(&app, &uri, &kekebang_order("KK-1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "SUCCESS");
    assert_eq!(body["data"]["order_id"], "KK-1");

    let (_, replay) = post_json(&app, &uri, &kekebang_order("KK-1")).await;
    assert_eq!(replay["code"], "FAIL");
    assert_eq!(replay["data"]["order_no"], body["data"]["order_no"]);
}

#[tokio::test]
async fn test_kekebang_bad_signature_still_answers_ok() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let mut request = kekebang_order("KK-2");
    request["sign"] = json!("deadbeef");

    let (status, body) = post_json(
        &app,
        &format!("/api/v1/kekebang/{KEKEBANG_ACCOUNT_NAME}/orders"),
        &request,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "FAIL");
    assert_eq!(h.orders.count(), 0);
}

#[tokio::test]
async fn test_kekebang_query_reports_status() {
    let h = Harness::new(DispatchMode::Sync);
    h.platform.always(Submit::Succeed);
    let app = app(&h);
    post_json(
        &app,
        &format!("/api/v1/kekebang/{KEKEBANG_ACCOUNT_NAME}/orders"),
        &kekebang_order("KK-3"),
    )
    .await;

    let query = |user_order_id: &str| {
        sign_with(
            json!({
                "app_key": KEKEBANG_APP_KEY,
                "user_order_id": user_order_id,
                "timestamp": Utc::now().timestamp(),
            }),
            |b| kekebang_sign(&params_from_json(b.as_object().unwrap()), KEKEBANG_SECRET),
        )
    };
    let uri = format!("/api/v1/kekebang/{KEKEBANG_ACCOUNT_NAME}/query");

    let (_, found) = post_json(&app, &uri, &query("KK-3")).await;
    assert_eq!(found["code"], 0);
    assert_eq!(found["data"]["status"], 2);

    let (_, missing) = post_json(&app, &uri, &query("KK-404")).await;
    assert_eq!(missing["data"]["status"], 3);
}

// ==================== MF178 ====================

#[tokio::test]
async fn test_mf178_create_order_and_replay() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);
    let uri = format!("/api/v1/mf178/order/{MF178_ACCOUNT_NAME}");

    let (status, body) = post_json(&app, &uri, &mf178_order(990001)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "SUCCESS");
    assert_eq!(body["data"]["orderId"], 990001);
    assert_eq!(h.recharge_queue_len().await, 1);

    let (_, replay) = post_json(&app, &uri, &mf178_order(990001)).await;
    assert_eq!(replay["code"], "FAIL");
    assert_eq!(replay["message"], "订单已存在");
    assert_eq!(replay["data"]["orderNo"], body["data"]["orderNo"]);
    assert_eq!(h.orders.count(), 1);
}

#[tokio::test]
async fn test_mf178_rejects_bad_signature_and_unknown_account() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);

    let mut request = mf178_order(990002);
    request["target"] = json!("13700137001");
    let (status, body) = post_json(
        &app,
        &format!("/api/v1/mf178/order/{MF178_ACCOUNT_NAME}"),
        &request,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "FAIL");

    let (_, body) = post_json(&app, "/api/v1/mf178/order/nobody", &mf178_order(990003)).await;
    assert_eq!(body["code"], "FAIL");
    assert_eq!(h.orders.count(), 0);
}

#[tokio::test]
async fn test_mf178_query_uses_numeric_codes() {
    let h = Harness::new(DispatchMode::Sync);
    h.platform.always(Submit::Succeed);
    let app = app(&h);
    post_json(
        &app,
        &format!("/api/v1/mf178/order/{MF178_ACCOUNT_NAME}"),
        &mf178_order(990004),
    )
    .await;

    let query = |user_order_id: i64| {
        sign_with(
            json!({
                "app_key": MF178_APP_KEY,
                "user_order_id": user_order_id,
                "timestamp": Utc::now().timestamp(),
            }),
            |b| mf178_sign(&params_from_json(b.as_object().unwrap()), MF178_SECRET),
        )
    };
    let uri = format!("/api/v1/mf178/order/{MF178_ACCOUNT_NAME}/query");

    let (_, found) = post_json(&app, &uri, &query(990004)).await;
    assert_eq!(found["code"], 0);
    assert_eq!(found["data"]["status"], 2);

    let (_, missing) = post_json(&app, &uri, &query(404)).await;
    assert_eq!(missing["code"], 1);
    assert_eq!(missing["message"], "订单不存在");
}

// ==================== 回调 ====================

#[tokio::test]
async fn test_callback_route_applies_result() {
    let h = Harness::new(DispatchMode::Queued);
    let created = h.place("CB-1").await;
    h.drain_recharge_queue().await;
    let app = app(&h);

    let (status, reply) = post(
        &app,
        "/api/v1/callback/fake",
        callback_body(&created.order.order_number, OrderStatus::Success),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "success");
    assert_eq!(h.order(created.order.id).status, OrderStatus::Success);
}

#[tokio::test]
async fn test_callback_unknown_platform_is_not_found() {
    let h = Harness::new(DispatchMode::Queued);
    let app = app(&h);

    let (status, _) = post(&app, "/api/v1/callback/nobody", "{}".to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ==================== 退款 ====================

#[tokio::test]
async fn test_refund_route() {
    let h = Harness::new(DispatchMode::Sync);
    h.platform.always(Submit::Succeed);
    let created = h.place("RF-1").await;
    let app = app(&h);
    let uri = format!("/api/v1/orders/{}/refund", created.order.id);

    let (status, body) =
        post_json(&app, &uri, &json!({ "operator": "ops", "reason": "客诉" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "退款成功");
    assert_eq!(body["data"]["status"], 6);
    assert_eq!(h.balances.balance(CUSTOMER_ID), dec("1000"));

    let (status, body) = post_json(&app, &uri, &json!({ "operator": "ops" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);
}

#[tokio::test]
async fn test_refund_requires_operator() {
    let h = Harness::new(DispatchMode::Sync);
    let app = app(&h);

    let (status, _) = post_json(&app, "/api/v1/orders/1/refund", &json!({ "operator": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
