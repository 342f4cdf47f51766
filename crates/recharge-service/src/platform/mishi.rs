//! 秘史充值平台
//!
//! 表单提交，JSON 应答。下单 `nRtn == 0` 表示受理；回调 `nFlag` 2 成功 3 失败，其余视为处理中。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
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
use crate::signature::{
    MishiOrderParams, SignParams, mishi_balance_sign, mishi_query_sign, mishi_submit_sign,
    verify_mishi_callback,
};

pub const CODE: &str = "mishi";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    n_rtn: i64,
    #[serde(default)]
    sz_rtn_code: String,
}

/// 查单与余额共用：`szRtnCode == "success"` 为成功
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    sz_rtn_code: String,
    #[serde(default)]
    sz_rtn_msg: Value,
    #[serde(default)]
    f_balance: Option<Value>,
}

/// 本地运营商编码到秘史 nSortType：联通与电信编码互换
fn sort_type(isp: i16) -> &'static str {
    match isp {
        1 => "1",
        2 => "3",
        3 => "2",
        _ => "4",
    }
}

/// 2 成功，3 失败，其余仍在处理
fn map_flag(flag: &str) -> OrderStatus {
    match flag.trim() {
        "2" => OrderStatus::Success,
        "3" => OrderStatus::Failed,
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

pub struct MishiPlatform {
    config: PlatformConfig,
    mode: DispatchMode,
    http: ProviderHttp,
}

impl MishiPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = ProviderHttp::new(CODE, Duration::from_secs(config.timeout_secs))?;
        let mode = config.dispatch_mode.parse()?;
        Ok(Self { config, mode, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn query(&self, path: &str, form: &SignParams) -> Result<QueryResponse> {
        let body = self.http.post_form(&self.endpoint(path), form).await?;
        let response: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| self.http.transient(format!("响应解析失败: {e}")))?;
        if response.sz_rtn_code != "success" {
            return Err(self.http.rejection(format!(
                "szRtnCode={}, szRtnMsg={}",
                response.sz_rtn_code,
                value_text(&response.sz_rtn_msg)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl PlatformAdapter for MishiPlatform {
    fn code(&self) -> &str {
        CODE
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let money = order.denom.trunc().normalize().to_string();
        let sort = sort_type(order.isp);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let sign = mishi_submit_sign(
            &MishiOrderParams {
                agent_id: &self.config.account,
                order_id: &order.order_number,
                phone: &order.mobile,
                money: &money,
                sort_type: sort,
                timestamp: &timestamp,
            },
            &self.config.app_secret,
        );

        let mut form = SignParams::new();
        form.insert("szAgentId".into(), self.config.account.clone());
        form.insert("szOrderId".into(), order.order_number.clone());
        form.insert("szPhoneNum".into(), order.mobile.clone());
        form.insert("nMoney".into(), money);
        form.insert("nSortType".into(), sort.into());
        form.insert("nProductClass".into(), "1".into());
        form.insert("nProductType".into(), "1".into());
        form.insert("szProductId".into(), order.provider_sku.clone().unwrap_or_default());
        form.insert("szTimeStamp".into(), timestamp);
        form.insert("szVerifyString".into(), sign);
        form.insert("szNotifyUrl".into(), self.config.callback_url.clone());

        let body = self
            .http
            .post_form(&self.endpoint("/api/submitorder"), &form)
            .await?;
        let response: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| self.http.transient(format!("响应解析失败: {e}")))?;
        if response.n_rtn != 0 {
            return Err(self.http.rejection(format!(
                "nRtn={}, szRtnCode={}",
                response.n_rtn, response.sz_rtn_code
            )));
        }

        info!("秘史下单已受理");
        Ok(SubmitOutcome::accepted(None))
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn query_status(&self, order: &Order) -> Result<Option<OrderStatus>> {
        let mut form = SignParams::new();
        form.insert("szAgentId".into(), self.config.account.clone());
        form.insert("szOrderId".into(), order.order_number.clone());
        form.insert(
            "szVerifyString".into(),
            mishi_query_sign(
                &self.config.account,
                &order.order_number,
                &self.config.app_secret,
            ),
        );

        let response = self.query("/query", &form).await?;
        // 状态码放在 szRtnMsg 中
        Ok(match map_flag(&value_text(&response.sz_rtn_msg)) {
            OrderStatus::Recharging => None,
            status => Some(status),
        })
    }

    async fn query_balance(&self) -> Result<Decimal> {
        let mut form = SignParams::new();
        form.insert("szAgentId".into(), self.config.account.clone());
        form.insert(
            "szVerifyString".into(),
            mishi_balance_sign(&self.config.account, &self.config.app_secret),
        );

        let response = self.query("/api/old/queryBalance", &form).await?;
        response
            .f_balance
            .as_ref()
            .map(value_text)
            .and_then(|b| b.parse::<Decimal>().ok())
            .ok_or_else(|| self.http.transient("余额解析失败"))
    }
}

impl CallbackParser for MishiPlatform {
    fn platform_code(&self) -> &str {
        CODE
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let params = parse_form(raw);
        let field = |name: &str| params.get(name).cloned().unwrap_or_default();

        let order_number = field("szOrderId");
        if order_number.is_empty() {
            return Err(RechargeError::Validation("回调缺少 szOrderId".to_string()));
        }
        if !verify_mishi_callback(&params, &field("szVerifyString"), &self.config.app_secret) {
            return Err(RechargeError::Auth("秘史回调签名错误".to_string()));
        }

        Ok(NormalizedCallback {
            order_number,
            provider_order_number: None,
            status: map_flag(&field("nFlag")),
            amount: params.get("fSalePrice").cloned(),
            message: field("szRtnMsg"),
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
