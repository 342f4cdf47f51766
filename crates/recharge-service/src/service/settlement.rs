//! 余额结算
//!
//! 扣款、失败退回与人工退款都以订单为单位做幂等：是否已扣/已退由该订单流水的净额决定，
//! 判断、写流水与改余额在同一个数据库事务内完成（见 `BalanceRepositoryTrait::apply`）。
//!
//! 退回与退款额外持有 `refund:order:{id}` 分布式锁，并发触发时最多一笔结算生效。

use std::sync::Arc;

use recharge_shared::observability::metrics;
use tracing::{info, instrument, warn};

use crate::error::{RechargeError, Result};
use crate::lock::LockManager;
use crate::models::{BalanceLog, BalanceStyle, NewBalanceLog, Order, OrderStatus};
use crate::repository::BalanceRepositoryTrait;
use crate::service::dto::RefundResult;
use crate::service::notify::NotifyService;
use crate::service::order_state::OrderStateMachine;

const SYSTEM_OPERATOR: &str = "system";

pub fn refund_lock_key(order_id: i64) -> String {
    format!("refund:order:{order_id}")
}

pub struct SettlementService {
    balances: Arc<dyn BalanceRepositoryTrait>,
    state: OrderStateMachine,
    locks: Arc<LockManager>,
    notifier: Arc<NotifyService>,
}

impl SettlementService {
    pub fn new(
        balances: Arc<dyn BalanceRepositoryTrait>,
        state: OrderStateMachine,
        locks: Arc<LockManager>,
        notifier: Arc<NotifyService>,
    ) -> Self {
        Self {
            balances,
            state,
            locks,
            notifier,
        }
    }

    fn entry(order: &Order, style: BalanceStyle, remark: String, operator: &str) -> NewBalanceLog {
        NewBalanceLog {
            user_id: order.customer_id,
            order_id: order.id,
            platform_account_id: order.platform_account_id,
            amount: order.price,
            style,
            remark,
            operator: operator.to_string(),
        }
    }

    /// 提交上游前扣款
    ///
    /// 已扣过返回 None；余额加授信不足返回 `InsufficientBalance`。
    #[instrument(skip(self, order), fields(order_id = order.id, price = %order.price))]
    pub async fn deduct_for_order(&self, order: &Order) -> Result<Option<BalanceLog>> {
        let entry = Self::entry(
            order,
            BalanceStyle::OrderDeduct,
            format!("订单扣款: {}", order.order_number),
            SYSTEM_OPERATOR,
        );
        let log = self.balances.apply(entry).await?;
        if let Some(log) = &log {
            info!(balance = %log.balance, "订单扣款完成");
        }
        Ok(log)
    }

    /// 充值失败后退回已扣金额，订单状态保持 Failed
    #[instrument(skip(self, order), fields(order_id = order.id))]
    pub async fn credit_failed_order(&self, order: &Order) -> Result<Option<BalanceLog>> {
        let entry = Self::entry(
            order,
            BalanceStyle::Refund,
            format!("充值失败退回: {}", order.order_number),
            SYSTEM_OPERATOR,
        );
        let log = self
            .locks
            .with_lock(&refund_lock_key(order.id), || self.balances.apply(entry))
            .await?;

        match &log {
            Some(log) => info!(amount = %log.amount, "失败订单已退回余额"),
            None => info!("失败订单无需退回"),
        }
        Ok(log)
    }

    /// 退款
    ///
    /// 1. 获取订单锁 -> 2. 重读订单并校验状态 -> 3. 事务内幂等退回余额
    /// -> 4. 订单流转为 Refunded -> 5. 释放锁 -> 6. 通知合作方
    #[instrument(skip(self, reason), fields(order_id = order_id, operator = %operator))]
    pub async fn refund_order(
        &self,
        order_id: i64,
        operator: &str,
        reason: &str,
    ) -> Result<RefundResult> {
        let result = self
            .locks
            .with_lock(&refund_lock_key(order_id), || {
                self.refund_locked(order_id, operator, reason)
            })
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(RechargeError::AlreadyRefunded(_)) => "already_refunded",
            Err(RechargeError::LockTimeout { .. }) => "lock_timeout",
            Err(_) => "error",
        };
        metrics::record_refund(outcome);

        let refunded = result?;
        if let Err(e) = self.notifier.notify_status(&refunded.order).await {
            warn!(error = %e, "退款通知生成失败");
        }
        Ok(refunded)
    }

    async fn refund_locked(&self, order_id: i64, operator: &str, reason: &str) -> Result<RefundResult> {
        let order = self.state.reload(order_id).await?;
        if order.status == OrderStatus::Refunded {
            return Err(RechargeError::AlreadyRefunded(order_id));
        }
        if !order.status.is_refundable() {
            return Err(RechargeError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        let remark = if reason.is_empty() {
            format!("订单退款: {}", order.order_number)
        } else {
            format!("订单退款: {} ({reason})", order.order_number)
        };
        // 失败订单可能已自动退回，此时只做状态流转
        let log = self
            .balances
            .apply(Self::entry(&order, BalanceStyle::Refund, remark, operator))
            .await?;

        let order = self.state.transition(&order, OrderStatus::Refunded, reason).await?;
        let amount = log.as_ref().map(|l| l.amount).unwrap_or_default();
        info!(amount = %amount, "订单退款完成");

        Ok(RefundResult { order, log, amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockConfig, LocalLock};
    use crate::models::{BalanceType, NewOrder};
    use crate::repository::{
        MockBalanceRepositoryTrait, MockNotificationRepositoryTrait, MockOrderRepositoryTrait,
    };
    use chrono::Utc;
    use recharge_shared::queue::MemoryQueue;
    use rust_decimal::Decimal;

    fn order(status: OrderStatus) -> Order {
        let mut order = NewOrder::test_fixture().into_order(9, Utc::now());
        order.status = status;
        order
    }

    fn log_for(entry: &NewBalanceLog) -> BalanceLog {
        BalanceLog {
            id: 1,
            user_id: entry.user_id,
            order_id: entry.order_id,
            platform_account_id: entry.platform_account_id,
            amount: entry.signed_amount(),
            balance_type: entry.balance_type(),
            style: entry.style,
            balance_before: Decimal::from(100),
            balance: Decimal::from(100) + entry.signed_amount(),
            remark: entry.remark.clone(),
            operator: entry.operator.clone(),
            created_at: Utc::now(),
        }
    }

    fn service(
        orders: MockOrderRepositoryTrait,
        balances: MockBalanceRepositoryTrait,
        notifications: MockNotificationRepositoryTrait,
    ) -> SettlementService {
        let notifier = NotifyService::new(
            Arc::new(notifications),
            Arc::new(MemoryQueue::new()),
            "notification_queue",
        );
        SettlementService::new(
            Arc::new(balances),
            OrderStateMachine::new(Arc::new(orders)),
            Arc::new(LockManager::new(
                Arc::new(LocalLock::new()),
                LockConfig::default(),
            )),
            Arc::new(notifier),
        )
    }

    #[tokio::test]
    async fn test_deduct_uses_order_price() {
        let mut balances = MockBalanceRepositoryTrait::new();
        balances
            .expect_apply()
            .withf(|e| e.style == BalanceStyle::OrderDeduct && e.amount == Decimal::new(4950, 2))
            .times(1)
            .returning(|e| Ok(Some(log_for(&e))));

        let service = service(
            MockOrderRepositoryTrait::new(),
            balances,
            MockNotificationRepositoryTrait::new(),
        );
        let log = service
            .deduct_for_order(&order(OrderStatus::Recharging))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.balance_type, BalanceType::Expense);
        assert_eq!(log.amount, Decimal::new(-4950, 2));
    }

    #[tokio::test]
    async fn test_refund_success_order() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_get()
            .returning(|_| Ok(Some(order(OrderStatus::Success))));
        orders
            .expect_update_status()
            .withf(|_, _, status, _| *status == OrderStatus::Refunded)
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut balances = MockBalanceRepositoryTrait::new();
        balances
            .expect_apply()
            .withf(|e| e.style == BalanceStyle::Refund && e.operator == "admin")
            .times(1)
            .returning(|e| Ok(Some(log_for(&e))));

        let mut notifications = MockNotificationRepositoryTrait::new();
        notifications
            .expect_create()
            .withf(|n| n.notification_type == "order_refunded")
            .times(1)
            .returning(|_| Ok(None));

        let result = service(orders, balances, notifications)
            .refund_order(9, "admin", "用户申请")
            .await
            .unwrap();
        assert_eq!(result.order.status, OrderStatus::Refunded);
        assert_eq!(result.amount, Decimal::new(4950, 2));
    }

    #[tokio::test]
    async fn test_refund_rejects_refunded_and_pending_orders() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_get()
            .returning(|_| Ok(Some(order(OrderStatus::Refunded))));
        let mut balances = MockBalanceRepositoryTrait::new();
        balances.expect_apply().never();

        let err = service(orders, balances, MockNotificationRepositoryTrait::new())
            .refund_order(9, "admin", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RechargeError::AlreadyRefunded(9)));

        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_get()
            .returning(|_| Ok(Some(order(OrderStatus::Recharging))));
        let err = service(
            orders,
            MockBalanceRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
        )
        .refund_order(9, "admin", "")
        .await
        .unwrap_err();
        assert!(matches!(err, RechargeError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_refund_failed_order_already_credited() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_get()
            .returning(|_| Ok(Some(order(OrderStatus::Failed))));
        orders.expect_update_status().returning(|_, _, _, _| Ok(true));

        let mut balances = MockBalanceRepositoryTrait::new();
        balances.expect_apply().returning(|_| Ok(None));

        let mut notifications = MockNotificationRepositoryTrait::new();
        notifications.expect_create().returning(|_| Ok(None));

        let result = service(orders, balances, notifications)
            .refund_order(9, "admin", "")
            .await
            .unwrap();
        assert_eq!(result.order.status, OrderStatus::Refunded);
        assert!(result.log.is_none());
        assert_eq!(result.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transaction_failure_leaves_order_untouched() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_get()
            .returning(|_| Ok(Some(order(OrderStatus::Success))));
        orders.expect_update_status().never();

        let mut balances = MockBalanceRepositoryTrait::new();
        balances
            .expect_apply()
            .returning(|_| Err(RechargeError::Database(sqlx::Error::PoolTimedOut)));

        let err = service(orders, balances, MockNotificationRepositoryTrait::new())
            .refund_order(9, "admin", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RechargeError::Database(_)));
    }

    #[test]
    fn test_lock_key() {
        assert_eq!(refund_lock_key(42), "refund:order:42");
    }
}
