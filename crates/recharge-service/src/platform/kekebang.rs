//! 客客帮充值平台
//!
//! JSON 接口，成功码为 "00000"，签名见 `signature::kekebang_sign`。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recharge_shared::config::PlatformConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::adapter::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    SubmitOutcome,
};
use super::http::ProviderHttp;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};
use crate::signature::{kekebang_sign, params_from_json, verify_kekebang};

pub const CODE: &str = "kekebang";
const SUCCESS_CODE: &str = "00000";

/// 充值业务
const BIZ_RECHARGE: &str = "1";
/// 余额查询
const BIZ_BALANCE: &str = "2";

#[derive(Debug, Deserialize)]
struct StringCodeResponse {
    #[serde(default, deserialize_with = "string_or_number")]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    status: String,
    #[serde(default, deserialize_with = "string_or_number")]
    balance: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// 平台订单状态：1 处理中 2 成功 3 失败 4 异常（需人工核实）
fn map_order_state(state: i64) -> Option<OrderStatus> {
    match state {
        1 => Some(OrderStatus::Recharging),
        2 => Some(OrderStatus::Success),
        3 => Some(OrderStatus::Failed),
        4 => Some(OrderStatus::Processing),
        _ => None,
    }
}

pub struct KekebangPlatform {
    config: PlatformConfig,
    mode: DispatchMode,
    http: ProviderHttp,
}

impl KekebangPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = ProviderHttp::new(CODE, Duration::from_secs(config.timeout_secs))?;
        let mode = config.dispatch_mode.parse()?;
        Ok(Self { config, mode, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// 签名后发送，并校验业务码
    async fn call(&self, url: &str, mut body: Value) -> Result<StringCodeResponse> {
        let sign = body
            .as_object()
            .map(|object| kekebang_sign(&params_from_json(object), &self.config.app_secret))
            .unwrap_or_default();
        body["sign"] = Value::String(sign);

        let raw = self.http.post_json(url, &body).await?;
        let response: StringCodeResponse = serde_json::from_str(&raw)
            .map_err(|e| self.http.transient(format!("响应解析失败: {e}")))?;

        if response.code != SUCCESS_CODE {
            return Err(self.http.rejection(format!(
                "code={}, message={}",
                response.code, response.message
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl PlatformAdapter for KekebangPlatform {
    fn code(&self) -> &str {
        CODE
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let body = json!({
            "app_key": self.config.app_key,
            "timestamp": Utc::now().timestamp().to_string(),
            "biz_code": BIZ_RECHARGE,
            "order_id": order.order_number,
            "sku_code": order.provider_sku.clone().unwrap_or_default(),
            "notify_url": self.config.callback_url,
            "data": { "account": order.mobile },
        });

        let response = self.call(&self.config.api_url, body).await?;
        info!(provider_order = ?response.order_id, "客客帮下单已受理");
        Ok(SubmitOutcome::accepted(response.order_id))
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn query_status(&self, order: &Order) -> Result<Option<OrderStatus>> {
        let body = json!({
            "app_key": self.config.app_key,
            "timestamp": Utc::now().timestamp().to_string(),
            "biz_code": BIZ_RECHARGE,
            "order_id": order.order_number,
        });

        let response = self.call(&self.endpoint("/query-order"), body).await?;
        let status = response
            .status
            .parse::<i64>()
            .ok()
            .and_then(map_order_state);
        if status.is_none() {
            warn!(status = %response.status, "客客帮查单返回未知状态");
        }
        Ok(status)
    }

    async fn query_balance(&self) -> Result<Decimal> {
        let body = json!({
            "app_key": self.config.app_key,
            "timestamp": Utc::now().timestamp().to_string(),
            "biz_code": BIZ_BALANCE,
        });

        let response = self.call(&self.endpoint("/query-balance"), body).await?;
        response
            .balance
            .parse::<Decimal>()
            .map_err(|e| self.http.transient(format!("余额解析失败: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct KekebangCallback {
    order_id: String,
    #[serde(default)]
    terrace_id: Option<String>,
    order_state: i64,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    return_msg: Option<String>,
    #[serde(default)]
    sign: String,
}

impl CallbackParser for KekebangPlatform {
    fn platform_code(&self) -> &str {
        CODE
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RechargeError::Validation(format!("回调报文不是合法 JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| RechargeError::Validation("回调报文不是 JSON 对象".to_string()))?;
        let callback: KekebangCallback = serde_json::from_value(value.clone())
            .map_err(|e| RechargeError::Validation(format!("回调字段缺失: {e}")))?;

        if !verify_kekebang(&params_from_json(object), &callback.sign, &self.config.app_secret) {
            return Err(RechargeError::Auth("客客帮回调签名错误".to_string()));
        }

        let status = map_order_state(callback.order_state).ok_or_else(|| {
            RechargeError::Validation(format!("未知订单状态: {}", callback.order_state))
        })?;

        Ok(NormalizedCallback {
            order_number: callback.order_id,
            provider_order_number: callback.terrace_id.filter(|s| !s.is_empty()),
            status,
            amount: callback.amount.map(|a| match a {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            message: callback.return_msg.unwrap_or_default(),
        })
    }

    fn reply(&self, accepted: bool) -> CallbackReply {
        if accepted {
            CallbackReply::json(r#"{"code":"00000"}"#)
        } else {
            CallbackReply::json(r#"{"code":"FAIL"}"#)
        }
    }
}
