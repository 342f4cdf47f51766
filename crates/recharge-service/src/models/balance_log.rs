//! 余额流水与用户余额

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{BalanceStyle, BalanceType};

/// 余额流水（只追加）
///
/// amount 为带符号的变动额：扣款为负，退款为正。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BalanceLog {
    pub id: i64,
    pub user_id: i64,
    pub order_id: i64,
    pub platform_account_id: i64,
    pub amount: Decimal,
    pub balance_type: BalanceType,
    pub style: BalanceStyle,
    pub balance_before: Decimal,
    pub balance: Decimal,
    pub remark: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
}

/// 待写入的流水
#[derive(Debug, Clone)]
pub struct NewBalanceLog {
    pub user_id: i64,
    pub order_id: i64,
    pub platform_account_id: i64,
    /// 变动额绝对值，方向由 style 决定
    pub amount: Decimal,
    pub style: BalanceStyle,
    pub remark: String,
    pub operator: String,
}

impl NewBalanceLog {
    pub fn balance_type(&self) -> BalanceType {
        match self.style {
            BalanceStyle::OrderDeduct => BalanceType::Expense,
            BalanceStyle::Refund | BalanceStyle::Recharge => BalanceType::Income,
            BalanceStyle::Manual => {
                if self.amount.is_sign_negative() {
                    BalanceType::Expense
                } else {
                    BalanceType::Income
                }
            }
        }
    }

    /// 带符号的变动额
    pub fn signed_amount(&self) -> Decimal {
        match self.balance_type() {
            BalanceType::Expense => -self.amount.abs(),
            BalanceType::Income => self.amount.abs(),
        }
    }
}

/// 用户余额
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserBalance {
    pub id: i64,
    pub balance: Decimal,
    /// 授信额度，可透支至 -credit
    pub credit: Decimal,
}

impl UserBalance {
    pub fn available(&self) -> Decimal {
        self.balance + self.credit
    }
}
