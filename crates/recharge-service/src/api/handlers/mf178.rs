//! MF178 渠道（米蜂）
//!
//! 下单走字符串码（SUCCESS / FAIL），查单走数字码（0 成功，1 失败）。
//! 签名为键值直接相连再拼接密钥，见 `signature::mf178_sign`。

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{Local, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::api::handlers::kekebang::query_status;
use crate::api::handlers::{check_mobile, check_timestamp, json_object, parse_id, string_or_number};
use crate::api::response::StringCodeResponse;
use crate::api::state::AppState;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderClient, PlatformAccount};
use crate::service::CreateOrderCommand;
use crate::signature::{SignParams, params_from_json, verify_mf178};

/// 下单请求
#[derive(Debug, Deserialize, Validate)]
pub struct Mf178OrderRequest {
    #[serde(default)]
    pub app_key: String,
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1, max = 64, message = "user_order_id 长度必须在 1-64 之间"))]
    pub user_order_id: String,
    pub target: String,
    /// 我方商品 ID
    #[serde(deserialize_with = "string_or_number")]
    pub outer_goods_code: String,
    #[serde(default)]
    pub goods_name: String,
    #[serde(default)]
    pub datas: Mf178OrderDatas,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Mf178OrderDatas {
    #[serde(default, deserialize_with = "string_or_number")]
    pub operator_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub prov_code: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,
}

impl Mf178OrderRequest {
    fn into_command(self) -> Result<CreateOrderCommand> {
        check_mobile(&self.target)?;
        let product_id = parse_id("outer_goods_code", &self.outer_goods_code)?;
        let amount = match self.datas.amount.trim() {
            "" | "0" => None,
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
            remark: "MF178订单".to_string(),
            param1: Some(self.datas.operator_id).filter(|v| !v.is_empty()),
            param2: Some(self.datas.prov_code).filter(|v| !v.is_empty()),
            param3: Some(self.goods_name).filter(|v| !v.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct Mf178QueryRequest {
    #[serde(deserialize_with = "string_or_number")]
    pub user_order_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[validate(length(min = 1, message = "sign 不能为空"))]
    pub sign: String,
}

/// 运营商名称转换为 isp，无法识别时按移动处理
fn isp_from_operator(operator: &str) -> i16 {
    let operator = operator.trim();
    match operator.strip_prefix("中国").unwrap_or(operator) {
        "电信" => 2,
        "联通" => 3,
        _ => 1,
    }
}

/// 合作方订单号是数字时原样回传数字
fn order_id_value(out_trade_num: &str) -> Value {
    out_trade_num
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(out_trade_num.to_string()))
}

fn order_data(order: &Order) -> Value {
    json!({
        "createTime": order
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%dT%H:%M:%S%z")
            .to_string(),
        "orderId": order_id_value(&order.out_trade_num),
        "orderNo": order.order_number,
    })
}

async fn authenticate(
    state: &AppState,
    userid: &str,
    params: &SignParams,
    timestamp: &str,
    sign: &str,
) -> Result<PlatformAccount> {
    let account = match state
        .services
        .orders
        .account_by_name(OrderClient::Mf178.platform_code(), userid)
        .await
    {
        Ok(account) => account,
        Err(RechargeError::AccountNotFound(_)) => {
            return Err(RechargeError::Auth(format!("无效的账号标识: {userid}")));
        }
        Err(e) => return Err(e),
    };
    if !verify_mf178(params, sign, &account.app_secret) {
        return Err(RechargeError::Auth("签名验证失败".to_string()));
    }
    check_timestamp(timestamp, state.partner.timestamp_window_secs, Utc::now().timestamp())?;
    Ok(account)
}

async fn place_order(
    state: &AppState,
    userid: &str,
    body: Value,
) -> Result<StringCodeResponse<Value>> {
    let params = params_from_json(json_object(&body)?);
    let req: Mf178OrderRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(state, userid, &params, &req.timestamp, &req.sign).await?;

    let command = req.into_command()?;
    let created = state
        .services
        .orders
        .create_order(&account, OrderClient::Mf178, command)
        .await?;

    let data = order_data(&created.order);
    if created.duplicate {
        return Ok(StringCodeResponse::fail_with("订单已存在", data));
    }
    info!(order_number = %created.order.order_number, account = %userid, "MF178 下单成功");
    Ok(StringCodeResponse::success(data))
}

/// 下单
///
/// POST /api/v1/mf178/order/{userid}
#[instrument(skip(state, body))]
pub async fn create_order(
    State(state): State<AppState>,
    Path(userid): Path<String>,
    Json(body): Json<Value>,
) -> Json<StringCodeResponse<Value>> {
    match place_order(&state, &userid, body).await {
        Ok(response) => Json(response),
        Err(e) => {
            warn!(error = %e, "MF178 下单失败");
            Json(StringCodeResponse::fail(e.public_message()))
        }
    }
}

async fn lookup(state: &AppState, userid: &str, body: Value) -> Result<Value> {
    let params = params_from_json(json_object(&body)?);
    let req: Mf178QueryRequest = serde_json::from_value(body)
        .map_err(|e| RechargeError::Validation(e.to_string()))?;
    req.validate()?;

    let account = authenticate(state, userid, &params, &req.timestamp, &req.sign).await?;

    let order = match state
        .services
        .orders
        .find_partner_order(&account, OrderClient::Mf178, &req.user_order_id)
        .await
    {
        Ok(order) => order,
        Err(RechargeError::OrderNotFound(_)) => return Ok(query_failure("订单不存在")),
        Err(e) => return Err(e),
    };
    let (status, rsp_info) = query_status(&order);

    Ok(json!({
        "code": 0,
        "message": "",
        "data": {
            "status": status,
            "rsp_info": rsp_info,
            "rsp_time": Utc::now().timestamp(),
        }
    }))
}

fn query_failure(message: &str) -> Value {
    json!({"code": 1, "message": message, "data": {}})
}

/// 查单
///
/// POST /api/v1/mf178/order/{userid}/query
pub async fn query_order(
    State(state): State<AppState>,
    Path(userid): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    match lookup(&state, &userid, body).await {
        Ok(body) => Json(body),
        Err(e) => {
            warn!(error = %e, "MF178 查单失败");
            Json(query_failure(&e.public_message()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrder;

    #[test]
    fn test_isp_from_operator_defaults_to_mobile() {
        assert_eq!(isp_from_operator("移动"), 1);
        assert_eq!(isp_from_operator("中国电信"), 2);
        assert_eq!(isp_from_operator("联通"), 3);
        assert_eq!(isp_from_operator(""), 1);
    }

    #[test]
    fn test_request_into_command() {
        let req: Mf178OrderRequest = serde_json::from_value(json!({
            "app_key": "mf-key",
            "user_order_id": 990001,
            "datas": {"operator_id": "联通", "prov_code": "广东", "amount": 100},
            "vender_id": 3,
            "target": "13800138000",
            "goods_id": 12,
            "goods_name": "联通100元",
            "outer_goods_code": "7",
            "official_payment": "100",
            "user_quote_type": 1,
            "user_quote_payment": "98",
            "user_payment": 98,
            "timestamp": 1700000000,
            "sign": "abc"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let command = req.into_command().unwrap();
        assert_eq!(command.out_trade_num, "990001");
        assert_eq!(command.product_id, 7);
        assert_eq!(command.amount, Some(Decimal::from(100)));
        assert_eq!(command.isp, 3);
        assert_eq!(command.param2.as_deref(), Some("广东"));
    }

    #[test]
    fn test_order_data_echoes_numeric_order_id() {
        let mut order = NewOrder::test_fixture().into_order(1, Utc::now());
        order.out_trade_num = "990001".to_string();
        let data = order_data(&order);
        assert_eq!(data["orderId"], 990001);
        assert_eq!(data["orderNo"], order.order_number.as_str());

        order.out_trade_num = "MF-1".to_string();
        assert_eq!(order_data(&order)["orderId"], "MF-1");
    }
}
