//! 数据模型
//!
//! 订单、重试记录、回调日志、余额流水、通知记录以及只读的账号与商品路由。

mod balance_log;
mod callback_log;
mod enums;
mod notification;
mod order;
mod platform_account;
mod product;
mod retry_record;

pub use balance_log::{BalanceLog, NewBalanceLog, UserBalance};
pub use callback_log::{CallbackLog, NewCallbackLog};
pub use enums::{
    BalanceStyle, BalanceType, CallbackOutcome, NotificationStatus, OrderClient, OrderStatus,
    RetryStatus,
};
pub use notification::{NewNotification, NotificationContent, NotificationRecord};
pub use order::{NewOrder, Order, generate_order_number};
pub use platform_account::PlatformAccount;
pub use product::ProductRoute;
pub use retry_record::RetryRecord;
