//! 上游平台抽象
//!
//! 每个充值平台实现两个接口：
//!
//! - `PlatformAdapter`: 下单、查单、查余额
//! - `CallbackParser`: 验签并把平台回调转换为统一的 `NormalizedCallback`
//!
//! 两者在 `PlatformRegistry` 中以平台编码登记在一起。

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};

/// 派单方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// 在创建任务的调用内直接提交
    Sync,
    /// 写入充值队列，由 RechargeWorker 串行提交
    Queued,
}

impl FromStr for DispatchMode {
    type Err = RechargeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "queued" | "queue" | "" => Ok(Self::Queued),
            other => Err(RechargeError::Validation(format!("未知派单方式: {other}"))),
        }
    }
}

/// 下单结果
///
/// `status` 只会是 Recharging（已受理，等待回调）、Success 或 Failed。
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub status: OrderStatus,
    pub provider_order_number: Option<String>,
    pub message: String,
}

impl SubmitOutcome {
    /// 上游已受理，结果等待回调
    pub fn accepted(provider_order_number: Option<String>) -> Self {
        Self {
            status: OrderStatus::Recharging,
            provider_order_number,
            message: "已受理".to_string(),
        }
    }

    pub fn succeeded(provider_order_number: Option<String>) -> Self {
        Self {
            status: OrderStatus::Success,
            provider_order_number,
            message: "充值成功".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Failed,
            provider_order_number: None,
            message: message.into(),
        }
    }
}

/// 上游平台能力接口
///
/// 错误约定：网络、超时与 5xx 返回 `TransientProvider`；上游明确拒单返回 `BusinessRejection`。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// 平台编码，注册表的 key
    fn code(&self) -> &str;

    fn dispatch_mode(&self) -> DispatchMode;

    /// 提交充值
    async fn submit(&self, order: &Order) -> Result<SubmitOutcome>;

    /// 主动查单；平台不支持或结果未知时返回 None
    async fn query_status(&self, order: &Order) -> Result<Option<OrderStatus>>;

    /// 查询我方在上游的账户余额
    async fn query_balance(&self) -> Result<Decimal>;
}

/// 统一回调结构
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCallback {
    /// 平台回传的我方订单号
    pub order_number: String,
    pub provider_order_number: Option<String>,
    pub status: OrderStatus,
    pub amount: Option<String>,
    pub message: String,
}

/// 回调应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackReply {
    pub body: &'static str,
    /// true 时以 application/json 返回
    pub json: bool,
}

impl CallbackReply {
    pub const fn text(body: &'static str) -> Self {
        Self { body, json: false }
    }

    pub const fn json(body: &'static str) -> Self {
        Self { body, json: true }
    }
}

/// 回调解析器
///
/// 签名不合法返回 `Auth`，报文无法解析返回 `Validation`。
#[cfg_attr(test, mockall::automock)]
pub trait CallbackParser: Send + Sync {
    fn platform_code(&self) -> &str;

    fn parse(&self, raw: &str) -> Result<NormalizedCallback>;

    /// `accepted` 为 false 时返回让平台稍后重推的应答
    fn reply(&self, accepted: bool) -> CallbackReply;
}

/// 解析 application/x-www-form-urlencoded 报文
pub(crate) fn parse_form(raw: &str) -> crate::signature::SignParams {
    reqwest::Url::parse(&format!("http://callback.local/?{}", raw.trim()))
        .map(|url| {
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_mode_from_str() {
        assert_eq!("sync".parse::<DispatchMode>().unwrap(), DispatchMode::Sync);
        assert_eq!("QUEUED".parse::<DispatchMode>().unwrap(), DispatchMode::Queued);
        assert!("later".parse::<DispatchMode>().is_err());
    }

    #[test]
    fn test_parse_form_decodes_values() {
        let params = parse_form("out_trade_num=P1&remark=%E5%A4%B1%E8%B4%A5&state=-1");
        assert_eq!(params.get("out_trade_num").map(String::as_str), Some("P1"));
        assert_eq!(params.get("remark").map(String::as_str), Some("失败"));
        assert_eq!(params.get("state").map(String::as_str), Some("-1"));
    }

    #[test]
    fn test_submit_outcome_constructors() {
        assert_eq!(SubmitOutcome::accepted(None).status, OrderStatus::Recharging);
        assert_eq!(SubmitOutcome::failed("x").status, OrderStatus::Failed);
    }
}
