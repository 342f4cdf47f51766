//! 充值平台（chongzhi）
//!
//! 表单提交，XML 应答。签名字段顺序固定，见 `signature::chongzhi_*`。
//! 下单应答 `resultno == 0` 表示受理；回调 `resultno` 1 成功 9 失败。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use recharge_shared::config::PlatformConfig;
use regex::Regex;
use reqwest::Url;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use super::adapter::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    SubmitOutcome, parse_form,
};
use super::http::ProviderHttp;
use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};
use crate::signature::{
    ChongzhiOrderParams, SignParams, chongzhi_balance_sign, chongzhi_callback_sign,
    chongzhi_submit_sign,
};

pub const CODE: &str = "chongzhi";

/// 取 XML 中第一个 `<tag>` 的文本
fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"(?s)<{tag}>\s*(.*?)\s*</{tag}>")).ok()?;
    pattern
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct ChongzhiPlatform {
    config: PlatformConfig,
    mode: DispatchMode,
    http: ProviderHttp,
}

impl ChongzhiPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = ProviderHttp::new(CODE, Duration::from_secs(config.timeout_secs))?;
        let mode = config.dispatch_mode.parse()?;
        Ok(Self { config, mode, http })
    }

    /// 余额接口与下单接口同目录
    fn balance_url(&self) -> Result<String> {
        Url::parse(&self.config.api_url)
            .and_then(|url| url.join("searchbalance.do"))
            .map(String::from)
            .map_err(|e| RechargeError::Internal(format!("平台地址无效: {e}")))
    }
}

#[async_trait]
impl PlatformAdapter for ChongzhiPlatform {
    fn code(&self) -> &str {
        CODE
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let productid = order.provider_sku.clone().unwrap_or_default();
        let price = order.denom.normalize().to_string();
        let spordertime = Local::now().format("%Y%m%d%H%M%S").to_string();
        let sign_params = ChongzhiOrderParams {
            userid: &self.config.account,
            productid: &productid,
            price: &price,
            num: "1",
            mobile: &order.mobile,
            spordertime: &spordertime,
            sporderid: &order.order_number,
        };
        let sign = chongzhi_submit_sign(&sign_params, &self.config.app_secret);

        let mut form = SignParams::new();
        form.insert("userid".into(), self.config.account.clone());
        form.insert("productid".into(), productid.clone());
        form.insert("price".into(), price.clone());
        form.insert("num".into(), "1".into());
        form.insert("mobile".into(), order.mobile.clone());
        form.insert("spordertime".into(), spordertime.clone());
        form.insert("sporderid".into(), order.order_number.clone());
        form.insert("sign".into(), sign);
        form.insert("back_url".into(), self.config.callback_url.clone());

        let body = self.http.post_form(&self.config.api_url, &form).await?;
        if body.trim().is_empty() {
            return Err(self.http.transient("服务器返回空响应"));
        }

        let result_no = xml_tag(&body, "resultno")
            .ok_or_else(|| self.http.transient(format!("应答缺少 resultno: {body}")))?;
        if result_no != "0" {
            let remark = xml_tag(&body, "remark1").unwrap_or_default();
            return Err(self
                .http
                .rejection(format!("resultno={result_no}, remark={remark}")));
        }

        let provider_order = xml_tag(&body, "orderid").filter(|s| !s.is_empty());
        info!(provider_order = ?provider_order, "充值平台下单已受理");
        Ok(SubmitOutcome::accepted(provider_order))
    }

    async fn query_status(&self, _order: &Order) -> Result<Option<OrderStatus>> {
        // 平台未开放查单接口，结果只能等回调
        Ok(None)
    }

    async fn query_balance(&self) -> Result<Decimal> {
        let mut form = SignParams::new();
        form.insert("userid".into(), self.config.account.clone());
        form.insert(
            "sign".into(),
            chongzhi_balance_sign(&self.config.account, &self.config.app_secret),
        );

        let body = self.http.post_form(&self.balance_url()?, &form).await?;
        match xml_tag(&body, "resultno").as_deref() {
            Some("1") => xml_tag(&body, "balance")
                .and_then(|b| b.parse::<Decimal>().ok())
                .ok_or_else(|| self.http.transient(format!("余额解析失败: {body}"))),
            other => Err(self
                .http
                .rejection(format!("余额查询失败: resultno={}", other.unwrap_or("")))),
        }
    }
}

impl CallbackParser for ChongzhiPlatform {
    fn platform_code(&self) -> &str {
        CODE
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let params = parse_form(raw);
        let field = |name: &str| params.get(name).cloned().unwrap_or_default();

        let userid = field("userid");
        let orderid = field("orderid");
        let sporderid = field("sporderid");
        let submit_time = field("merchantsubmittime");
        let result_no = field("resultno");
        let sign = field("sign");

        if [&userid, &orderid, &sporderid, &submit_time, &result_no, &sign]
            .iter()
            .any(|v| v.is_empty())
        {
            return Err(RechargeError::Validation("回调缺少必要参数".to_string()));
        }

        let expected = chongzhi_callback_sign(
            &userid,
            &orderid,
            &sporderid,
            &submit_time,
            &result_no,
            &self.config.app_secret,
        );
        if !expected.eq_ignore_ascii_case(&sign) {
            return Err(RechargeError::Auth("充值平台回调签名错误".to_string()));
        }

        let status = match result_no.as_str() {
            "1" => OrderStatus::Success,
            "9" => OrderStatus::Failed,
            other => {
                return Err(RechargeError::Validation(format!("未知 resultno: {other}")));
            }
        };

        Ok(NormalizedCallback {
            order_number: sporderid,
            provider_order_number: Some(orderid),
            status,
            amount: params.get("parvalue").cloned(),
            message: field("remark1"),
        })
    }

    fn reply(&self, accepted: bool) -> CallbackReply {
        if accepted {
            CallbackReply::text("OK")
        } else {
            CallbackReply::text("FAIL")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> ChongzhiPlatform {
        ChongzhiPlatform::new(PlatformConfig {
            code: CODE.to_string(),
            name: "充值平台".to_string(),
            api_url: "http://cz.test:9086/onlinepay.do".to_string(),
            account: "U100".to_string(),
            app_key: String::new(),
            app_secret: "KEY".to_string(),
            callback_url: "http://self.test/api/v1/callback/chongzhi".to_string(),
            timeout_secs: 5,
            dispatch_mode: "queued".to_string(),
        })
        .unwrap()
    }

    fn callback_form(resultno: &str) -> String {
        let sign = chongzhi_callback_sign("U100", "C1", "P1", "20240101120000", resultno, "KEY");
        format!(
            "userid=U100&orderid=C1&sporderid=P1&merchantsubmittime=20240101120000&resultno={resultno}&parvalue=50&remark1=&sign={sign}"
        )
    }

    #[test]
    fn test_xml_tag() {
        let body = r#"<?xml version="1.0" encoding="gb2312"?><order><orderid>C1</orderid><resultno>0</resultno><remark1></remark1></order>"#;
        assert_eq!(xml_tag(body, "resultno").as_deref(), Some("0"));
        assert_eq!(xml_tag(body, "orderid").as_deref(), Some("C1"));
        assert_eq!(xml_tag(body, "remark1").as_deref(), Some(""));
        assert_eq!(xml_tag(body, "balance"), None);
    }

    #[test]
    fn test_balance_url_is_sibling_of_api_url() {
        assert_eq!(
            platform().balance_url().unwrap(),
            "http://cz.test:9086/searchbalance.do"
        );
    }

    #[test]
    fn test_parse_callback_statuses() {
        let p = platform();
        let ok = p.parse(&callback_form("1")).unwrap();
        assert_eq!(ok.order_number, "P1");
        assert_eq!(ok.provider_order_number.as_deref(), Some("C1"));
        assert_eq!(ok.status, OrderStatus::Success);

        let failed = p.parse(&callback_form("9")).unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
    }

    #[test]
    fn test_parse_callback_rejects_bad_sign_and_missing_fields() {
        let p = platform();
        let tampered = callback_form("1").replace("orderid=C1", "orderid=C2");
        assert!(matches!(p.parse(&tampered).unwrap_err(), RechargeError::Auth(_)));
        assert!(matches!(
            p.parse("userid=U100").unwrap_err(),
            RechargeError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_query_status_is_unsupported() {
        let order = crate::models::NewOrder::test_fixture().into_order(1, chrono::Utc::now());
        assert_eq!(platform().query_status(&order).await.unwrap(), None);
    }
}
