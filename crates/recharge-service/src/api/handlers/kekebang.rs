//! 客客帮渠道（字符串码）
//!
//! 所有结果都以 HTTP 200 返回，成败看 `code`：SUCCESS / FAIL。

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::api::handlers::{check_mobile, check_timestamp, json_object, parse_id, string_or_number};
use crate::api::response::StringCodeResponse;
use crate::api::state::AppState;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderClient, OrderStatus, PlatformAccount};
use crate::service::CreateOrderCommand;
use crate::signature::{SignParams, params_from_json, verify_kekebang};

/// 下单请求
#[derive(Debug, Deserialize, Validate)]
pub struct KekebangOrderRequest {
    #[validate(length(min = 1, message = "app_key 不能为空"))]
    pub app_key: String,
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1, max = 64, message = "user_order_id 长度必须在 1-64 之间"))]
    pub user_order_id: String,
    pub target: String,
    /// 我方商品 ID
    #[serde(deserialize_with = "string_or_number")]
    pub outer_goods_code: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub goods_id: String,
    #[serde(default)]
    pub goods_name: String,
    #[serde(default)]
    pub datas: KekebangOrderDatas,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct KekebangOrderDatas {
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub operator_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub prov_code: String,
}

impl KekebangOrderRequest {
    fn into_command(self) -> Result<CreateOrderCommand> {
        check_mobile(&self.target)?;
        let product_id = parse_id("outer_goods_code", &self.outer_goods_code)?;
        let amount = match self.datas.amount.trim() {
            "" => None,
            raw => Some(
                raw.parse::<Decimal>()
                    .map_err(|_| RechargeError::Validation(format!("amount 格式错误: {raw}")))?,
            ),
        };

        Ok(CreateOrderCommand {
            out_trade_num: self.user_order_id,
            mobile: self.target,
            product_id,
            amount,
            notify_url: None,
            isp: isp_from_operator(&self.datas.operator_id),
            remark: "客客帮订单".to_string(),
            param1: Some(self.datas.prov_code).filter(|v| !v.is_empty()),
            param2: Some(self.goods_id).filter(|v| !v.is_empty()),
            param3: Some(self.goods_name).filter(|v| !v.is_empty()),
        })
    }
}

/// 查单请求
#[derive(Debug, Deserialize, Validate)]
pub struct KekebangQueryRequest {
    #[validate(length(min = 1, message = "app_key 不能为空"))]
    pub app_key: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_order_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

#[derive(Debug, Serialize)]
pub struct KekebangOrderData {
    /// 客客帮的订单号
    pub order_id: String,
    pub order_no: String,
    pub status: i16,
    pub create_time: i64,
}

impl From<&Order> for KekebangOrderData {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.out_trade_num.clone(),
            order_no: order.order_number.clone(),
            status: order.status as i16,
            create_time: order.created_at.timestamp(),
        }
    }
}

/// 运营商名称或编码转换为 isp
///
/// 1 移动 2 电信 3 联通 4 虚拟；客客帮的编码是 1 移动 2 联通 3 电信。
pub fn isp_from_operator(operator: &str) -> i16 {
    let operator = operator.trim();
    let operator = operator.strip_prefix("中国").unwrap_or(operator);
    match operator {
        "1" | "移动" => 1,
        "2" | "联通" => 3,
        "3" | "电信" => 2,
        "虚拟" | "虚商" => 4,
        _ => 0,
    }
}

/// 字符串码渠道查单状态：1 充值中 2 成功 3 失败 4 已退款
pub(crate) fn query_status(order: &Order) -> (i16, String) {
    match order.status {
        OrderStatus::PendingPayment
        | OrderStatus::PendingRecharge
        | OrderStatus::Recharging
        | OrderStatus::Processing => (1, "充值中".to_string()),
        OrderStatus::Success => (2, "充值成功".to_string()),
        OrderStatus::Failed => (3, order.remark.clone()),
        OrderStatus::Refunded => (4, "已退款".to_string()),
        OrderStatus::Cancelled => (3, "订单已取消".to_string()),
        OrderStatus::Partial => (3, "部分充值".to_string()),
        OrderStatus::Split => (3, "订单已拆单".to_string()),
    }
}

async fn authenticate(
    state: &AppState,
    account_name: &str,
    params: &SignParams,
    app_key: &str,
    timestamp: &str,
    sign: &str,
) -> Result<PlatformAccount> {
    let account = match state
        .services
        .orders
        .account_by_name(OrderClient::Kekebang.platform_code(), account_name)
        .await
    {
        Ok(account) => account,
        Err(RechargeError::AccountNotFound(_)) => {
            return Err(RechargeError::Auth(format!("账号不存在: {account_name}")));
        }
        Err(e) => return Err(e),
    };
    if account.app_key != app_key {
        return Err(RechargeError::Auth("app_key 不匹配".to_string()));
    }
    check_timestamp(timestamp, state.partner.timestamp_window_secs, Utc::now().timestamp())?;
    if !verify_kekebang(params, sign, &account.app_secret) {
        return Err(RechargeError::Auth("签名错误".to_string()));
    }
    Ok(account)
}

async fn place_order(
    state: &AppState,
    account_name: &str,
    body: Value,
) -> Result<StringCodeResponse<Value>> {
    let params = params_from_json(json_object(&body)?);
    let req: KekebangOrderRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(
        state,
        account_name,
        &params,
        &req.app_key,
        &req.timestamp,
        &req.sign,
    )
    .await?;

    let command = req.into_command()?;
    let created = state
        .services
        .orders
        .create_order(&account, OrderClient::Kekebang, command)
        .await?;

    let data = serde_json::to_value(KekebangOrderData::from(&created.order))?;
    if created.duplicate {
        return Ok(StringCodeResponse::fail_with("订单已存在", data));
    }
    info!(order_number = %created.order.order_number, account = %account_name, "客客帮下单成功");
    Ok(StringCodeResponse::success(data))
}

/// 下单
///
/// POST /api/v1/kekebang/{account_name}/orders
#[instrument(skip(state, body))]
pub async fn create_order(
    State(state): State<AppState>,
    Path(account_name): Path<String>,
    Json(body): Json<Value>,
) -> Json<StringCodeResponse<Value>> {
    match place_order(&state, &account_name, body).await {
        Ok(response) => Json(response),
        Err(e) => {
            warn!(error = %e, "客客帮下单失败");
            Json(StringCodeResponse::fail(e.public_message()))
        }
    }
}

async fn lookup(state: &AppState, account_name: &str, body: Value) -> Result<Value> {
    let params = params_from_json(json_object(&body)?);
    let req: KekebangQueryRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(
        state,
        account_name,
        &params,
        &req.app_key,
        &req.timestamp,
        &req.sign,
    )
    .await?;

    let (status, rsp_info) = match state
        .services
        .orders
        .find_partner_order(&account, OrderClient::Kekebang, &req.user_order_id)
        .await
    {
        Ok(order) => query_status(&order),
        Err(RechargeError::OrderNotFound(_)) => (3, "订单不存在或已失效".to_string()),
        Err(e) => return Err(e),
    };

    Ok(json!({
        "code": 0,
        "message": "success",
        "data": {
            "status": status,
            "rsp_info": rsp_info,
            "rsp_time": Utc::now().timestamp(),
        }
    }))
}

/// 查单
///
/// POST /api/v1/kekebang/{account_name}/query
pub async fn query_order(
    State(state): State<AppState>,
    Path(account_name): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    match lookup(&state, &account_name, body).await {
        Ok(body) => Json(body),
        Err(e) => {
            warn!(error = %e, "客客帮查单失败");
            Json(serde_json::to_value(StringCodeResponse::fail(e.public_message())).unwrap_or_default())
        }
    }
}
