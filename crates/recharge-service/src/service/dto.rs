//! 服务层数据传输对象

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{BalanceLog, CallbackOutcome, Order, OrderStatus};
use crate::platform::CallbackReply;

/// 充值队列消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RechargeTask {
    pub order_id: i64,
    pub order_number: String,
    pub enqueued_at: DateTime<Utc>,
}

impl RechargeTask {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// 合作方下单指令（两个渠道的请求都归一到这里）
#[derive(Debug, Clone, Default)]
pub struct CreateOrderCommand {
    pub out_trade_num: String,
    pub mobile: String,
    pub product_id: i64,
    /// 合作方声明的面值，给出时必须与商品一致
    pub amount: Option<Decimal>,
    pub notify_url: Option<String>,
    pub isp: i16,
    pub remark: String,
    pub param1: Option<String>,
    pub param2: Option<String>,
    pub param3: Option<String>,
}

/// 下单结果
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    /// true 表示 out_trade_num 已存在，返回的是原订单
    pub duplicate: bool,
}

/// 退款结果
#[derive(Debug, Clone)]
pub struct RefundResult {
    pub order: Order,
    /// 失败订单已自动退回时为 None
    pub log: Option<BalanceLog>,
    pub amount: Decimal,
}

/// 回调处理结果
#[derive(Debug, Clone)]
pub struct CallbackHandling {
    pub outcome: CallbackOutcome,
    pub order_number: Option<String>,
    /// 处理后的订单状态
    pub status: Option<OrderStatus>,
    pub reply: CallbackReply,
}
