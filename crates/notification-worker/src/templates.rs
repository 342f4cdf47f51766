//! 通知报文模板
//!
//! 按合作方渠道把订单快照渲染成推送请求：
//!
//! - `external_api`：POST 到下单时登记的 notify_url，报文按规范签名
//! - `kekebang`：POST 到 `{base}/openapi/suppler/v1/report-user`，
//!   报文为 `app_key, timestamp, data`，其中 data 是 JSON 字符串，按回推签名方案整体参与签名
//! - `mf178`：POST 到账号登记地址下的 `/userapi/sgd/updateStatus`，报文结构同客客帮，按 MF178 签名

use chrono::{DateTime, Utc};
use recharge_service::models::{
    NotificationContent, NotificationRecord, OrderClient, OrderStatus, PlatformAccount,
};
use recharge_service::signature::{
    canonical_sign, kekebang_notify_sign, mf178_sign, params_from_json,
};
use recharge_shared::config::PlatformConfig;
use serde_json::{Value, json};

use crate::error::{NotificationError, Result};

const KEKEBANG_REPORT_PATH: &str = "/openapi/suppler/v1/report-user";
const MF178_REPORT_PATH: &str = "/userapi/sgd/updateStatus";

/// 一次推送请求
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub url: String,
    pub body: Value,
}

pub struct TemplateEngine {
    /// 客客帮账号未单独配置回调地址时使用的平台地址
    kekebang_base_url: Option<String>,
}

impl TemplateEngine {
    pub fn new(kekebang_base_url: Option<String>) -> Self {
        Self {
            kekebang_base_url: kekebang_base_url.filter(|u| !u.is_empty()),
        }
    }

    pub fn from_platforms(platforms: &[PlatformConfig]) -> Self {
        let base = platforms
            .iter()
            .find(|p| p.code == OrderClient::Kekebang.platform_code())
            .map(|p| p.api_url.clone());
        Self::new(base)
    }

    /// 渲染推送请求；该状态在渠道协议里没有对应推送时返回 None
    pub fn render(
        &self,
        record: &NotificationRecord,
        content: &NotificationContent,
        account: &PlatformAccount,
        now: DateTime<Utc>,
    ) -> Result<Option<PushRequest>> {
        match record.platform_code.as_str() {
            "external_api" => external_api(content, account, now).map(Some),
            "kekebang" => self.kekebang(content, account, now),
            "mf178" => mf178(content, account, now),
            other => Err(NotificationError::Template(format!(
                "不支持的通知渠道: {other}"
            ))),
        }
    }

    fn kekebang(
        &self,
        content: &NotificationContent,
        account: &PlatformAccount,
        now: DateTime<Utc>,
    ) -> Result<Option<PushRequest>> {
        let Some(status) = kekebang_status(content.status) else {
            return Ok(None);
        };

        let base = account
            .notify_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.kekebang_base_url.as_deref())
            .ok_or_else(|| NotificationError::Template("客客帮回调地址未配置".to_string()))?;

        let mut body = report_body(content, account, status, now);
        let sign = kekebang_notify_sign(&signable(&body)?, &account.app_secret);
        body["sign"] = Value::String(sign);

        Ok(Some(PushRequest {
            url: format!("{}{KEKEBANG_REPORT_PATH}", base.trim_end_matches('/')),
            body,
        }))
    }
}

/// 客客帮与 MF178 共用的回报报文，data 为 JSON 字符串
fn report_body(
    content: &NotificationContent,
    account: &PlatformAccount,
    status: i16,
    now: DateTime<Utc>,
) -> Value {
    let data = json!({
        "user_order_id": content.out_trade_num,
        "status": status,
        "rsp_info": status_text(content.status),
    });
    json!({
        "app_key": account.app_key,
        "timestamp": now.timestamp().to_string(),
        "data": data.to_string(),
    })
}

fn mf178(
    content: &NotificationContent,
    account: &PlatformAccount,
    now: DateTime<Utc>,
) -> Result<Option<PushRequest>> {
    let Some(status) = kekebang_status(content.status) else {
        return Ok(None);
    };
    let base = account
        .notify_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| NotificationError::Template("MF178 回调地址未配置".to_string()))?;

    let mut body = report_body(content, account, status, now);
    let sign = mf178_sign(&signable(&body)?, &account.app_secret);
    body["sign"] = Value::String(sign);

    Ok(Some(PushRequest {
        url: format!("{}{MF178_REPORT_PATH}", base.trim_end_matches('/')),
        body,
    }))
}

fn external_api(
    content: &NotificationContent,
    account: &PlatformAccount,
    now: DateTime<Utc>,
) -> Result<PushRequest> {
    let url = content
        .notify_url
        .as_deref()
        .or(account.notify_url.as_deref())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| NotificationError::Template("订单缺少回调地址".to_string()))?;

    let mut body = json!({
        "app_id": account.app_key,
        "order_number": content.order_number,
        "out_trade_num": content.out_trade_num,
        "mobile": content.mobile,
        "denom": content.denom.to_string(),
        "status": i16::from(content.status),
        "status_text": status_text(content.status),
        "remark": content.remark,
        "timestamp": now.timestamp(),
        "nonce": now.timestamp_nanos_opt().unwrap_or_default().to_string(),
    });
    let sign = canonical_sign(&signable(&body)?, &account.app_secret);
    body["sign"] = Value::String(sign);

    Ok(PushRequest {
        url: url.to_string(),
        body,
    })
}

fn signable(body: &Value) -> Result<recharge_service::signature::SignParams> {
    body.as_object()
        .map(params_from_json)
        .ok_or_else(|| NotificationError::Template("报文必须是 JSON 对象".to_string()))
}

/// 客客帮与 MF178 回报状态：9 成功，8 失败
fn kekebang_status(status: OrderStatus) -> Option<i16> {
    match status {
        OrderStatus::Success => Some(9),
        OrderStatus::Failed | OrderStatus::Refunded => Some(8),
        _ => None,
    }
}

fn status_text(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Success => "充值成功",
        OrderStatus::Failed => "充值失败",
        OrderStatus::Refunded => "已退款",
        OrderStatus::Partial => "部分充值",
        OrderStatus::Split => "订单已拆单",
        OrderStatus::Cancelled => "订单已取消",
        _ => "充值中",
    }
}
