//! 外部 API 渠道（数字码）
//!
//! 鉴权顺序：app_id 对应账号 -> 时间戳窗口 -> 规范签名 -> nonce 防重放。
//! nonce 放在验签之后，伪造请求无法消耗合作方的 nonce。

use std::time::Duration;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use validator::Validate;

use crate::api::handlers::{
    check_mobile, check_timestamp, json_object, non_empty, parse_id, string_or_number,
};
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderClient, PlatformAccount};
use crate::service::CreateOrderCommand;
use crate::signature::{SignParams, params_from_json, verify_canonical};

/// 下单请求
#[derive(Debug, Deserialize, Validate)]
pub struct ExternalOrderRequest {
    #[validate(length(min = 1, max = 64, message = "app_id 不能为空"))]
    pub app_id: String,
    pub mobile: String,
    #[serde(deserialize_with = "string_or_number")]
    pub product_id: String,
    #[validate(length(min = 1, max = 64, message = "out_trade_num 长度必须在 1-64 之间"))]
    pub out_trade_num: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(default)]
    #[validate(url(message = "notify_url 必须是有效的 URL"))]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub param1: Option<String>,
    #[serde(default)]
    pub param2: Option<String>,
    #[serde(default)]
    pub param3: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub isp: String,
    #[serde(default)]
    #[validate(length(max = 255, message = "备注最长 255 字符"))]
    pub remark: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, max = 64, message = "nonce 不能为空"))]
    pub nonce: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

impl ExternalOrderRequest {
    fn into_command(self) -> Result<CreateOrderCommand> {
        check_mobile(&self.mobile)?;
        let product_id = parse_id("product_id", &self.product_id)?;
        let amount = match self.amount.trim() {
            "" => None,
            raw => Some(
                raw.parse::<Decimal>()
                    .map_err(|_| RechargeError::Validation(format!("amount 格式错误: {raw}")))?,
            ),
        };
        let isp = match self.isp.trim() {
            "" => 0,
            raw => raw
                .parse::<i16>()
                .map_err(|_| RechargeError::Validation(format!("isp 格式错误: {raw}")))?,
        };

        Ok(CreateOrderCommand {
            out_trade_num: self.out_trade_num,
            mobile: self.mobile,
            product_id,
            amount,
            notify_url: non_empty(self.notify_url),
            isp,
            remark: self.remark.unwrap_or_default(),
            param1: non_empty(self.param1),
            param2: non_empty(self.param2),
            param3: non_empty(self.param3),
        })
    }
}

/// 查单请求
#[derive(Debug, Deserialize, Validate)]
pub struct ExternalQueryRequest {
    #[validate(length(min = 1, max = 64, message = "app_id 不能为空"))]
    pub app_id: String,
    #[validate(length(min = 1, max = 64, message = "out_trade_num 长度必须在 1-64 之间"))]
    pub out_trade_num: String,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, max = 64, message = "nonce 不能为空"))]
    pub nonce: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

/// 订单响应
#[derive(Debug, Clone, Serialize)]
pub struct ExternalOrderData {
    pub order_number: String,
    pub out_trade_num: String,
    pub mobile: String,
    pub denom: Decimal,
    pub price: Decimal,
    pub status: i16,
    pub status_text: &'static str,
    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Order> for ExternalOrderData {
    fn from(order: &Order) -> Self {
        Self {
            order_number: order.order_number.clone(),
            out_trade_num: order.out_trade_num.clone(),
            mobile: order.mobile.clone(),
            denom: order.denom,
            price: order.price,
            status: order.status as i16,
            status_text: order.status.as_str(),
            remark: order.remark.clone(),
            created_at: order.created_at,
            finished_at: order.finished_at,
        }
    }
}

/// 合作方鉴权所需字段
struct PartnerAuth<'a> {
    app_id: &'a str,
    timestamp: &'a str,
    nonce: &'a str,
    sign: &'a str,
}

async fn authenticate(
    state: &AppState,
    params: &SignParams,
    auth: PartnerAuth<'_>,
) -> Result<PlatformAccount> {
    let account = match state.services.orders.account_by_app_key(auth.app_id).await {
        Ok(account) if account.platform_code == OrderClient::ExternalApi.platform_code() => account,
        Ok(_) | Err(RechargeError::AccountNotFound(_)) => {
            return Err(RechargeError::Auth(format!("app_id 无效: {}", auth.app_id)));
        }
        Err(e) => return Err(e),
    };

    check_timestamp(
        auth.timestamp,
        state.partner.timestamp_window_secs,
        Utc::now().timestamp(),
    )?;

    if !verify_canonical(params, auth.sign, &account.app_secret) {
        return Err(RechargeError::Auth("签名错误".to_string()));
    }

    let ttl = Duration::from_secs(state.partner.nonce_ttl_secs);
    if !state.nonces.remember(auth.app_id, auth.nonce, ttl).await? {
        return Err(RechargeError::Auth("nonce 已使用".to_string()));
    }

    Ok(account)
}

/// 下单
///
/// POST /api/v1/external/orders
///
/// 同一 out_trade_num 重复提交时返回 409 和原订单，不会重复扣款。
#[instrument(skip_all)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<ApiResponse<ExternalOrderData>>> {
    let params = params_from_json(json_object(&body)?);
    let req: ExternalOrderRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(
        &state,
        &params,
        PartnerAuth {
            app_id: &req.app_id,
            timestamp: &req.timestamp,
            nonce: &req.nonce,
            sign: &req.sign,
        },
    )
    .await?;

    let command = req.into_command()?;
    let created = state
        .services
        .orders
        .create_order(&account, OrderClient::ExternalApi, command)
        .await?;

    let data = ExternalOrderData::from(&created.order);
    if created.duplicate {
        return Ok(Json(ApiResponse::with_code(409, "订单已存在", Some(data))));
    }

    info!(order_number = %data.order_number, app_id = %account.app_key, "外部 API 下单成功");
    Ok(Json(ApiResponse::success(data)))
}

/// 查单
///
/// POST /api/v1/external/orders/query
pub async fn query_order(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<ApiResponse<ExternalOrderData>>> {
    let params = params_from_json(json_object(&body)?);
    let req: ExternalQueryRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(
        &state,
        &params,
        PartnerAuth {
            app_id: &req.app_id,
            timestamp: &req.timestamp,
            nonce: &req.nonce,
            sign: &req.sign,
        },
    )
    .await?;

    let order = state
        .services
        .orders
        .find_partner_order(&account, OrderClient::ExternalApi, &req.out_trade_num)
        .await?;

    Ok(Json(ApiResponse::success(ExternalOrderData::from(&order))))
}
