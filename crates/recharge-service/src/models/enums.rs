//! 充值服务枚举类型定义
//!
//! 状态类枚举以整数落库（int2），JSON 中同样以整数传递，与合作方协议保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 为整数编码的枚举生成 `TryFrom<i16>` / `From<Enum> for i16`
macro_rules! int_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        impl From<$name> for i16 {
            fn from(value: $name) -> i16 {
                value as i16
            }
        }

        impl TryFrom<i16> for $name {
            type Error = String;

            fn try_from(value: i16) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(format!("invalid {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// 订单状态
///
/// 合法流转见 `service::order_state`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum OrderStatus {
    /// 待支付
    PendingPayment = 1,
    /// 待充值
    PendingRecharge = 2,
    /// 充值中
    Recharging = 3,
    /// 充值成功
    Success = 4,
    /// 充值失败
    Failed = 5,
    /// 已退款
    Refunded = 6,
    /// 已取消
    Cancelled = 7,
    /// 部分充值
    Partial = 8,
    /// 已拆单
    Split = 9,
    /// 处理中（上游异常，人工核实）
    Processing = 10,
}

int_enum!(OrderStatus {
    PendingPayment = 1,
    PendingRecharge = 2,
    Recharging = 3,
    Success = 4,
    Failed = 5,
    Refunded = 6,
    Cancelled = 7,
    Partial = 8,
    Split = 9,
    Processing = 10,
});

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::PendingRecharge => "pending_recharge",
            Self::Recharging => "recharging",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
            Self::Partial => "partial",
            Self::Split => "split",
            Self::Processing => "processing",
        }
    }

    /// 上游给出最终结果的状态（会触发通知）
    pub fn is_final_outcome(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Partial | Self::Split
        )
    }

    /// 不再有出边的状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Cancelled | Self::Split)
    }

    /// 可退款状态
    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Partial)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单来源渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum OrderClient {
    /// 后台手工下单
    Manual = 1,
    /// 外部 API（数字码渠道）
    ExternalApi = 2,
    /// 客客帮（字符串码渠道）
    Kekebang = 3,
    /// 米蜂（MF178，字符串码渠道）
    Mf178 = 4,
}

int_enum!(OrderClient {
    Manual = 1,
    ExternalApi = 2,
    Kekebang = 3,
    Mf178 = 4,
});

impl OrderClient {
    /// 通知模板使用的平台编码
    pub fn platform_code(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::ExternalApi => "external_api",
            Self::Kekebang => "kekebang",
            Self::Mf178 => "mf178",
        }
    }
}

/// 重试记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum RetryStatus {
    /// 等待重试
    Pending = 0,
    /// 已成功，不再重试
    Success = 1,
    /// 已达上限或终结失败
    Failed = 2,
}

int_enum!(RetryStatus {
    Pending = 0,
    Success = 1,
    Failed = 2,
});

/// 回调处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// 已应用到订单
    Applied,
    /// 重复回调，无副作用
    Duplicate,
    /// 与本地终态矛盾，待人工处理
    Conflict,
    /// 验签失败或无法解析
    Rejected,
    /// 中间态回调，仅记录
    Ignored,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

/// 余额变动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum BalanceType {
    /// 收入
    Income = 1,
    /// 支出
    Expense = 2,
}

int_enum!(BalanceType {
    Income = 1,
    Expense = 2,
});

/// 余额变动来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum BalanceStyle {
    /// 下单扣款
    OrderDeduct = 1,
    /// 订单退款
    Refund = 2,
    /// 人工调整
    Manual = 3,
    /// 账户充值
    Recharge = 4,
}

int_enum!(BalanceStyle {
    OrderDeduct = 1,
    Refund = 2,
    Manual = 3,
    Recharge = 4,
});

/// 通知记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum NotificationStatus {
    /// 待处理
    Pending = 1,
    /// 处理中
    Processing = 2,
    /// 成功
    Success = 3,
    /// 失败
    Failed = 4,
}

int_enum!(NotificationStatus {
    Pending = 1,
    Processing = 2,
    Success = 3,
    Failed = 4,
});
