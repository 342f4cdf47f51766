//! 上游回调审计日志

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{CallbackOutcome, OrderStatus};

/// 回调日志（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallbackLog {
    pub id: i64,
    pub platform_code: String,
    /// 回调中携带的订单号，验签失败时可能为空
    pub order_number: String,
    pub raw_payload: String,
    #[sqlx(default)]
    pub parsed_status: Option<OrderStatus>,
    pub outcome: CallbackOutcome,
    #[sqlx(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCallbackLog {
    pub platform_code: String,
    pub order_number: String,
    pub raw_payload: String,
    pub parsed_status: Option<OrderStatus>,
    pub outcome: CallbackOutcome,
    pub error_message: Option<String>,
}
