//! 通知记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;

use super::enums::{NotificationStatus, OrderClient, OrderStatus};
use super::order::Order;

/// 推送给合作方的通知记录
///
/// 同时也是通知队列的消息体；worker 出队后以数据库状态为准。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub order_id: i64,
    pub platform_code: String,
    pub notification_type: String,
    /// JSON 内容
    pub content: String,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub next_retry_time: DateTime<Utc>,
    #[sqlx(default)]
    pub success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[sqlx(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub order_id: i64,
    pub platform_code: String,
    pub notification_type: String,
    pub content: String,
}

impl NewNotification {
    /// 同一订单同一状态只通知一次
    pub fn status_type(status: OrderStatus) -> String {
        format!("order_{}", status.as_str())
    }

    /// 订单状态变更通知；后台手工单没有合作方，返回 None
    pub fn for_order(order: &Order) -> Result<Option<Self>, serde_json::Error> {
        if order.client == OrderClient::Manual {
            return Ok(None);
        }
        let content = serde_json::to_string(&NotificationContent::from(order))?;
        Ok(Some(Self {
            order_id: order.id,
            platform_code: order.client.platform_code().to_string(),
            notification_type: Self::status_type(order.status),
            content,
        }))
    }
}

/// 通知内容：生成记录时的订单快照
///
/// 推送模板只依赖这份快照和合作方账号，不再回查订单。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub order_id: i64,
    pub order_number: String,
    pub out_trade_num: String,
    pub mobile: String,
    pub denom: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub client: OrderClient,
    pub platform_account_id: i64,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub remark: String,
}

impl From<&Order> for NotificationContent {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            out_trade_num: order.out_trade_num.clone(),
            mobile: order.mobile.clone(),
            denom: order.denom,
            price: order.price,
            status: order.status,
            client: order.client,
            platform_account_id: order.platform_account_id,
            notify_url: order.notify_url.clone(),
            remark: order.remark.clone(),
        }
    }
}

impl NotificationRecord {
    pub fn parse_content(&self) -> Result<NotificationContent, serde_json::Error> {
        serde_json::from_str(&self.content)
    }
}
