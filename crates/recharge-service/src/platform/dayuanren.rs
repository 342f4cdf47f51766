//! 大猿人充值平台
//!
//! 表单提交，JSON 应答，`errno == 0` 表示受理成功。

use std::time::Duration;

use async_trait::async_trait;
use recharge_shared::config::PlatformConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use super::adapter::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    SubmitOutcome, parse_form,
};
use super::http::ProviderHttp;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};
use crate::signature::{SignParams, dayuanren_sign, verify_dayuanren};

pub const CODE: &str = "dayuanren";

#[derive(Debug, Deserialize)]
struct DayuanrenResponse {
    errno: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    data: Value,
}

/// -1/2 失败，0 充值中，1 成功，3 部分成功
fn map_state(state: i64) -> Option<OrderStatus> {
    match state {
        -1 | 2 => Some(OrderStatus::Failed),
        0 => Some(OrderStatus::Recharging),
        1 => Some(OrderStatus::Success),
        3 => Some(OrderStatus::Partial),
        _ => None,
    }
}

pub struct DayuanrenPlatform {
    config: PlatformConfig,
    mode: DispatchMode,
    http: ProviderHttp,
}

impl DayuanrenPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = ProviderHttp::new(CODE, Duration::from_secs(config.timeout_secs))?;
        let mode = config.dispatch_mode.parse()?;
        Ok(Self { config, mode, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn sign(&self, params: &mut SignParams) {
        let sign = dayuanren_sign(params, &self.config.app_secret);
        params.insert("sign".to_string(), sign);
    }

    async fn call(&self, path: &str, mut params: SignParams) -> Result<Value> {
        self.sign(&mut params);
        let raw = self.http.post_form(&self.endpoint(path), &params).await?;
        let response: DayuanrenResponse = serde_json::from_str(&raw)
            .map_err(|e| self.http.transient(format!("响应解析失败: {e}")))?;

        if response.errno != 0 {
            return Err(self
                .http
                .rejection(format!("errno={}, errmsg={}", response.errno, response.errmsg)));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl PlatformAdapter for DayuanrenPlatform {
    fn code(&self) -> &str {
        CODE
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let mut params = SignParams::new();
        params.insert("out_trade_num".into(), order.order_number.clone());
        params.insert("product_id".into(), order.provider_sku.clone().unwrap_or_default());
        params.insert("mobile".into(), order.mobile.clone());
        params.insert("notify_url".into(), self.config.callback_url.clone());
        params.insert("userid".into(), self.config.account.clone());
        for (key, value) in [
            ("param1", &order.param1),
            ("param2", &order.param2),
            ("param3", &order.param3),
        ] {
            if let Some(v) = value.as_ref().filter(|v| !v.is_empty()) {
                params.insert(key.into(), v.clone());
            }
        }

        let data = self.call("/index/recharge", params).await?;
        let provider_order = data
            .get("order_number")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(provider_order = ?provider_order, "大猿人下单已受理");
        Ok(SubmitOutcome::accepted(provider_order))
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn query_status(&self, order: &Order) -> Result<Option<OrderStatus>> {
        let mut params = SignParams::new();
        params.insert("userid".into(), self.config.account.clone());
        params.insert("out_trade_nums".into(), order.order_number.clone());

        let data = self.call("/index/check", params).await?;
        Ok(data
            .as_array()
            .and_then(|orders| orders.first())
            .and_then(|first| first.get("state"))
            .and_then(Value::as_i64)
            .and_then(map_state))
    }

    async fn query_balance(&self) -> Result<Decimal> {
        Err(self.http.rejection("大猿人平台暂不支持余额查询"))
    }
}

impl CallbackParser for DayuanrenPlatform {
    fn platform_code(&self) -> &str {
        CODE
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let params = parse_form(raw);
        let field = |name: &str| params.get(name).cloned().unwrap_or_default();

        let order_number = field("out_trade_num");
        if order_number.is_empty() {
            return Err(RechargeError::Validation("回调缺少 out_trade_num".to_string()));
        }
        if !verify_dayuanren(&params, &field("sign"), &self.config.app_secret) {
            return Err(RechargeError::Auth("大猿人回调签名错误".to_string()));
        }

        let state_raw = field("state");
        let status = state_raw
            .parse::<i64>()
            .ok()
            .and_then(map_state)
            .ok_or_else(|| RechargeError::Validation(format!("未知订单状态: {state_raw}")))?;

        Ok(NormalizedCallback {
            order_number,
            provider_order_number: params.get("order_number").cloned().filter(|s| !s.is_empty()),
            status,
            amount: params.get("charge_amount").cloned(),
            message: field("remark"),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> DayuanrenPlatform {
        DayuanrenPlatform::new(PlatformConfig {
            code: CODE.to_string(),
            name: "大猿人".to_string(),
            api_url: "http://dyr.test/".to_string(),
            account: "10086".to_string(),
            app_key: String::new(),
            app_secret: "APIKEY".to_string(),
            callback_url: "http://self.test/api/v1/callback/dayuanren".to_string(),
            timeout_secs: 5,
            dispatch_mode: "sync".to_string(),
        })
        .unwrap()
    }

    fn signed_form(state: &str) -> String {
        let mut params = SignParams::new();
        params.insert("out_trade_num".into(), "P1".into());
        params.insert("state".into(), state.into());
        params.insert("charge_amount".into(), "50.00".into());
        params.insert("otime".into(), "1700000000".into());
        params.insert("remark".into(), String::new());
        let sign = dayuanren_sign(&params, "APIKEY");
        params.insert("sign".into(), sign);
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[test]
    fn test_endpoint_trims_slash() {
        assert_eq!(platform().endpoint("/index/check"), "http://dyr.test/index/check");
        assert_eq!(platform().dispatch_mode(), DispatchMode::Sync);
    }

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(-1), Some(OrderStatus::Failed));
        assert_eq!(map_state(2), Some(OrderStatus::Failed));
        assert_eq!(map_state(3), Some(OrderStatus::Partial));
        assert_eq!(map_state(7), None);
    }

    #[test]
    fn test_parse_success_callback() {
        let parsed = platform().parse(&signed_form("1")).unwrap();
        assert_eq!(parsed.order_number, "P1");
        assert_eq!(parsed.status, OrderStatus::Success);
        assert_eq!(parsed.amount.as_deref(), Some("50.00"));
    }

    #[test]
    fn test_parse_rejects_wrong_sign() {
        let form = signed_form("1").replace("state=1", "state=-1");
        assert!(matches!(
            platform().parse(&form).unwrap_err(),
            RechargeError::Auth(_)
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        assert!(matches!(
            platform().parse(&signed_form("8")).unwrap_err(),
            RechargeError::Validation(_)
        ));
    }
}
