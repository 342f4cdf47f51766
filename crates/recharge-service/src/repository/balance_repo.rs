//! 余额与流水仓储
//!
//! 流水只追加。订单相关的扣款和退款以该订单的流水净额判断是否已处理，
//! 同一事务内先锁用户余额行，保证并发下判断与写入不会交错。

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::traits::BalanceRepositoryTrait;
use crate::error::{RechargeError, Result};
use crate::models::{BalanceLog, BalanceStyle, NewBalanceLog, UserBalance};

const LOG_COLUMNS: &str = r#"
    id, user_id, order_id, platform_account_id, amount, balance_type, style,
    balance_before, balance, remark, operator, created_at
"#;

pub struct BalanceRepository {
    pool: PgPool,
}

impl BalanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 订单的扣款/退款净额：小于 0 表示当前处于已扣款状态
    async fn order_net_in_tx(conn: &mut PgConnection, order_id: i64) -> Result<Decimal> {
        let net: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM balance_logs
            WHERE order_id = $1 AND style IN ($2, $3)
            "#,
        )
        .bind(order_id)
        .bind(BalanceStyle::OrderDeduct)
        .bind(BalanceStyle::Refund)
        .fetch_one(conn)
        .await?;

        Ok(net)
    }
}

#[async_trait]
impl BalanceRepositoryTrait for BalanceRepository {
    async fn get_balance(&self, user_id: i64) -> Result<Option<UserBalance>> {
        let balance = sqlx::query_as::<_, UserBalance>(
            "SELECT id, balance, credit FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn apply(&self, entry: NewBalanceLog) -> Result<Option<BalanceLog>> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserBalance>(
            "SELECT id, balance, credit FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(entry.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RechargeError::AccountNotFound(entry.user_id.to_string()))?;

        match entry.style {
            BalanceStyle::OrderDeduct => {
                let net = Self::order_net_in_tx(&mut tx, entry.order_id).await?;
                if net < Decimal::ZERO {
                    return Ok(None);
                }
                if user.available() < entry.amount.abs() {
                    return Err(RechargeError::InsufficientBalance {
                        required: entry.amount.abs().to_string(),
                        available: user.available().to_string(),
                    });
                }
            }
            BalanceStyle::Refund => {
                let net = Self::order_net_in_tx(&mut tx, entry.order_id).await?;
                if net >= Decimal::ZERO {
                    return Ok(None);
                }
            }
            BalanceStyle::Manual | BalanceStyle::Recharge => {}
        }

        let delta = entry.signed_amount();
        let after = user.balance + delta;

        let log = sqlx::query_as::<_, BalanceLog>(&format!(
            r#"
            INSERT INTO balance_logs (
                user_id, order_id, platform_account_id, amount, balance_type, style,
                balance_before, balance, remark, operator
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(entry.user_id)
        .bind(entry.order_id)
        .bind(entry.platform_account_id)
        .bind(delta)
        .bind(entry.balance_type())
        .bind(entry.style)
        .bind(user.balance)
        .bind(after)
        .bind(&entry.remark)
        .bind(&entry.operator)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(entry.user_id)
            .bind(after)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(log))
    }

    async fn list_by_order(&self, order_id: i64) -> Result<Vec<BalanceLog>> {
        let logs = sqlx::query_as::<_, BalanceLog>(&format!(
            "SELECT {LOG_COLUMNS} FROM balance_logs WHERE order_id = $1 ORDER BY id ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
