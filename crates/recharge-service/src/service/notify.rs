//! 结果通知入队
//!
//! 订单进入最终状态后生成一条通知记录并推入通知队列，推送本身由 notification-worker 完成。
//! 记录以 (order_id, notification_type) 去重，重复触发不会产生第二条通知。

use std::sync::Arc;

use recharge_shared::queue::{Queue, QueueExt};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::{NewNotification, NotificationRecord, Order};
use crate::repository::NotificationRepositoryTrait;

pub struct NotifyService {
    notifications: Arc<dyn NotificationRepositoryTrait>,
    queue: Arc<dyn Queue>,
    notification_queue: String,
}

impl NotifyService {
    pub fn new(
        notifications: Arc<dyn NotificationRepositoryTrait>,
        queue: Arc<dyn Queue>,
        notification_queue: impl Into<String>,
    ) -> Self {
        Self {
            notifications,
            queue,
            notification_queue: notification_queue.into(),
        }
    }

    /// 为订单当前状态生成通知
    ///
    /// 入队失败只记录警告：记录已落库，worker 的补偿扫描会把它捡回来。
    #[instrument(skip(self, order), fields(order_id = order.id, status = %order.status))]
    pub async fn notify_status(&self, order: &Order) -> Result<Option<NotificationRecord>> {
        let Some(notification) = NewNotification::for_order(order)? else {
            debug!("手工订单无需通知");
            return Ok(None);
        };

        let Some(record) = self.notifications.create(notification).await? else {
            debug!("通知已存在，跳过");
            return Ok(None);
        };

        if let Err(e) = self.queue.push_json(&self.notification_queue, &record).await {
            warn!(notification_id = record.id, error = %e, "通知入队失败，等待补偿扫描");
        } else {
            info!(notification_id = record.id, "通知已入队");
        }

        Ok(Some(record))
    }
}
