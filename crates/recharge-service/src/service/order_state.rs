//! 订单状态机
//!
//! 所有状态写入都经过这里：先校验流转是否合法，再以 `(id, version)` 做 CAS。
//! 非法流转不产生任何写入；CAS 失败返回 `ConcurrencyConflict`，调用方重读后再决定。
//!
//! ```text
//! PendingPayment  -> PendingRecharge | Cancelled
//! PendingRecharge -> Recharging | Cancelled
//! Recharging      -> Success | Failed | Partial | Split | Processing | Cancelled
//! Processing      -> Success | Failed | Partial
//! Failed          -> PendingRecharge | Refunded
//! Success         -> Refunded
//! Partial         -> Refunded
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::{RechargeError, Result};
use crate::models::{Order, OrderStatus};
use crate::repository::OrderRepositoryTrait;

/// 合法后继状态
pub fn allowed_next(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;

    match from {
        PendingPayment => &[PendingRecharge, Cancelled],
        PendingRecharge => &[Recharging, Cancelled],
        Recharging => &[Success, Failed, Partial, Split, Processing, Cancelled],
        Processing => &[Success, Failed, Partial],
        Failed => &[PendingRecharge, Refunded],
        Success | Partial => &[Refunded],
        Split | Refunded | Cancelled => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub struct OrderStateMachine {
    orders: Arc<dyn OrderRepositoryTrait>,
}

impl OrderStateMachine {
    pub fn new(orders: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { orders }
    }

    /// 执行一次状态流转，返回写入后的订单
    ///
    /// `order` 必须是调用方刚读到的快照，其 version 用于 CAS。
    #[instrument(skip(self, order, remark), fields(order_id = order.id, from = %order.status, to = %to))]
    pub async fn transition(&self, order: &Order, to: OrderStatus, remark: &str) -> Result<Order> {
        if !can_transition(order.status, to) {
            return Err(RechargeError::InvalidTransition {
                order_id: order.id,
                from: order.status,
                to,
            });
        }

        let updated = self
            .orders
            .update_status(order.id, order.version, to, remark)
            .await?;
        if !updated {
            debug!(version = order.version, "订单版本已变化，状态写入被拒绝");
            return Err(RechargeError::ConcurrencyConflict);
        }

        info!(order_number = %order.order_number, "订单状态已更新");

        let now = Utc::now();
        let mut next = order.clone();
        next.status = to;
        next.version += 1;
        next.updated_at = now;
        if !remark.is_empty() {
            next.remark = remark.to_string();
        }
        if to.is_final_outcome() {
            next.finished_at = Some(now);
        }
        Ok(next)
    }

    /// 重读订单
    pub async fn reload(&self, order_id: i64) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_id.to_string()))
    }
}
