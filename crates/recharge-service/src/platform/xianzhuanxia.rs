//! 闲赚侠充值平台
//!
//! JSON 提交，签名放在 `Auth_Token` 请求头，格式见 `signature::xianzhuanxia_token`。
//! 应答 `code == 0` 表示成功；订单状态 1 成功 2 失败，其余处理中。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recharge_shared::config::PlatformConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use super::adapter::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    SubmitOutcome,
};
use super::http::ProviderHttp;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};
use crate::signature::{SignParams, verify_xianzhuanxia_token, xianzhuanxia_token};

pub const CODE: &str = "xianzhuanxia";

const AUTH_HEADER: &str = "Auth_Token";

/// 上游最长等待秒数
const MAX_WAIT_SECS: u32 = 600;

#[derive(Debug, Deserialize)]
struct XianzhuanxiaResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct XianzhuanxiaCallback {
    order_id: String,
    status: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    sign: String,
    #[serde(default)]
    timestamp: Value,
}

fn map_status(status: i64) -> OrderStatus {
    match status {
        1 => OrderStatus::Success,
        2 => OrderStatus::Failed,
        _ => OrderStatus::Recharging,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct XianzhuanxiaPlatform {
    config: PlatformConfig,
    mode: DispatchMode,
    http: ProviderHttp,
}

impl XianzhuanxiaPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = ProviderHttp::new(CODE, Duration::from_secs(config.timeout_secs))?;
        let mode = config.dispatch_mode.parse()?;
        Ok(Self { config, mode, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn call(&self, path: &str, params: &SignParams) -> Result<Value> {
        let token = xianzhuanxia_token(
            params,
            &self.config.app_key,
            &self.config.account,
            Utc::now().timestamp_millis(),
        );
        let raw = self
            .http
            .post_json_with_header(&self.endpoint(path), params, AUTH_HEADER, &token)
            .await?;
        let response: XianzhuanxiaResponse = serde_json::from_str(&raw)
            .map_err(|e| self.http.transient(format!("响应解析失败: {e}")))?;

        if response.code != 0 {
            return Err(self
                .http
                .rejection(format!("code={}, message={}", response.code, response.message)));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl PlatformAdapter for XianzhuanxiaPlatform {
    fn code(&self) -> &str {
        CODE
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let mut params = SignParams::new();
        params.insert("orderNo".into(), order.order_number.clone());
        params.insert("accountNum".into(), order.mobile.clone());
        params.insert("taskGoodsId".into(), order.provider_sku.clone().unwrap_or_default());
        params.insert("notifyUrl".into(), self.config.callback_url.clone());
        params.insert("maxWaitTime".into(), MAX_WAIT_SECS.to_string());

        let data = self.call("", &params).await?;
        let provider_order = data
            .get("order_id")
            .map(value_text)
            .filter(|s| !s.is_empty());
        info!(provider_order = ?provider_order, "闲赚侠下单已受理");
        Ok(SubmitOutcome::accepted(provider_order))
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn query_status(&self, order: &Order) -> Result<Option<OrderStatus>> {
        // 查单用上游单号，下单未回传时无从查询
        let Some(provider_order) = order.provider_order_number.as_ref() else {
            return Ok(None);
        };
        let mut params = SignParams::new();
        params.insert("user_id".into(), self.config.account.clone());
        params.insert("order_id".into(), provider_order.clone());
        params.insert("timestamp".into(), Utc::now().timestamp().to_string());

        let data = self.call("/query", &params).await?;
        Ok(data
            .get("status")
            .and_then(Value::as_i64)
            .map(map_status)
            .filter(|s| *s != OrderStatus::Recharging))
    }

    async fn query_balance(&self) -> Result<Decimal> {
        let mut params = SignParams::new();
        params.insert("user_id".into(), self.config.account.clone());
        params.insert("timestamp".into(), Utc::now().timestamp().to_string());

        let data = self.call("/query-balance", &params).await?;
        data.get("balance")
            .map(value_text)
            .and_then(|b| b.parse::<Decimal>().ok())
            .ok_or_else(|| self.http.transient("余额解析失败"))
    }
}

impl CallbackParser for XianzhuanxiaPlatform {
    fn platform_code(&self) -> &str {
        CODE
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let callback: XianzhuanxiaCallback = serde_json::from_str(raw)
            .map_err(|e| RechargeError::Validation(format!("回调报文解析失败: {e}")))?;
        if callback.order_id.is_empty() {
            return Err(RechargeError::Validation("回调缺少 order_id".to_string()));
        }

        let status_raw = value_text(&callback.status);
        let amount = value_text(&callback.amount);
        let mut params = SignParams::new();
        params.insert("order_id".into(), callback.order_id.clone());
        params.insert("status".into(), status_raw.clone());
        params.insert("amount".into(), amount.clone());
        params.insert("timestamp".into(), value_text(&callback.timestamp));

        if !verify_xianzhuanxia_token(
            &params,
            &callback.sign,
            &self.config.app_key,
            &self.config.account,
        ) {
            return Err(RechargeError::Auth("闲赚侠回调签名错误".to_string()));
        }

        let status = status_raw
            .parse::<i64>()
            .map(map_status)
            .map_err(|_| RechargeError::Validation(format!("未知订单状态: {status_raw}")))?;

        Ok(NormalizedCallback {
            order_number: callback.order_id,
            provider_order_number: None,
            status,
            amount: Some(amount).filter(|a| !a.is_empty()),
            message: callback.message,
        })
    }

    fn reply(&self, accepted: bool) -> CallbackReply {
        if accepted {
            CallbackReply::text("success")
        } else {
            CallbackReply::text("fail")
        }
    }
}
