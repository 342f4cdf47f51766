//! 仓储 Trait 定义
//!
//! 服务层依赖这些抽象而非具体实现，便于 mock 测试和内存替身。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    BalanceLog, CallbackLog, CallbackOutcome, NewBalanceLog, NewCallbackLog, NewNotification,
    NewOrder, NotificationRecord, Order, OrderClient, OrderStatus, PlatformAccount, ProductRoute,
    RetryRecord, RetryStatus, UserBalance,
};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 创建订单；同渠道 out_trade_num 重复时返回 `DuplicateOrder`
    async fn create(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: i64) -> Result<Option<Order>>;

    async fn get_by_order_number(&self, order_number: &str) -> Result<Option<Order>>;

    async fn get_by_out_trade_num(
        &self,
        client: OrderClient,
        out_trade_num: &str,
    ) -> Result<Option<Order>>;

    /// 以 (id, version) 做 CAS 更新状态；返回 false 表示版本已变化
    async fn update_status(
        &self,
        id: i64,
        expected_version: i32,
        status: OrderStatus,
        remark: &str,
    ) -> Result<bool>;

    /// 写入履约路由（同样走版本 CAS）
    async fn set_route(
        &self,
        id: i64,
        expected_version: i32,
        platform_code: &str,
        provider_sku: &str,
    ) -> Result<bool>;

    /// 记录上游订单号，不影响状态与版本
    async fn set_provider_order_number(&self, id: i64, provider_order_number: &str) -> Result<()>;

    /// 查询停留在某状态超过指定时间的订单（主动查单用）
    async fn list_stale(
        &self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>>;
}

/// 重试记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetryRepositoryTrait: Send + Sync {
    /// 创建一条待重试记录（attempt_count=1，即首次尝试）
    async fn create(
        &self,
        order_id: i64,
        max_retries: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<RetryRecord>;

    /// 订单当前未关闭的重试记录
    async fn find_open(&self, order_id: i64) -> Result<Option<RetryRecord>>;

    /// 领取到期记录，并把它们的 next_retry_at 推后 `lease_secs` 秒，避免多实例重复领取
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<RetryRecord>>;

    /// 确认仍持有领取时拿到的租约
    ///
    /// 记录未关闭、next_retry_at 仍等于领取时写入的 `leased_until` 且租约未过期时返回 true。
    /// 租约过期后记录可能已被其他实例重新领取，此时返回 false。
    async fn hold_lease(
        &self,
        id: i64,
        leased_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// 记录一次失败的重试
    async fn record_failure(
        &self,
        id: i64,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    /// 关闭记录
    async fn close(&self, id: i64, status: RetryStatus, last_error: &str) -> Result<()>;
}

/// 回调日志仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallbackLogRepositoryTrait: Send + Sync {
    async fn insert(&self, log: NewCallbackLog) -> Result<i64>;

    /// 按处理结果查询（冲突回调的人工处理队列）
    async fn list_by_outcome(&self, outcome: CallbackOutcome, limit: i64)
    -> Result<Vec<CallbackLog>>;
}

/// 余额仓储接口
///
/// `apply` 在一个数据库事务内完成：锁定用户余额行、按订单净额做幂等判断、
/// 写流水、更新余额。任何一步失败都整体回滚。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceRepositoryTrait: Send + Sync {
    async fn get_balance(&self, user_id: i64) -> Result<Option<UserBalance>>;

    /// 写入一条与订单关联的流水
    ///
    /// - OrderDeduct：订单当前净额未扣款时才扣，余额 + 授信不足返回 `InsufficientBalance`
    /// - Refund：订单当前净额处于已扣款时才退
    ///
    /// 返回 None 表示已处理过（幂等跳过）。
    async fn apply(&self, entry: NewBalanceLog) -> Result<Option<BalanceLog>>;

    async fn list_by_order(&self, order_id: i64) -> Result<Vec<BalanceLog>>;
}

/// 通知记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    /// 创建通知；同一 (order_id, notification_type) 已存在时返回 None
    async fn create(&self, notification: NewNotification) -> Result<Option<NotificationRecord>>;

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>>;

    /// pending -> processing 的 CAS 认领
    async fn claim(&self, id: i64) -> Result<bool>;

    async fn mark_success(&self, id: i64) -> Result<()>;

    /// 回到 pending 并安排下次重试
    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_time: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// 到期的待处理记录（补偿扫描用）
    async fn list_due_pending(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<NotificationRecord>>;

    /// 把处理中超时的记录放回 pending，返回数量
    async fn reset_stale_processing(&self, updated_before: DateTime<Utc>) -> Result<u64>;
}

/// 合作方账号仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformAccountRepositoryTrait: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<PlatformAccount>>;

    async fn get_by_app_key(&self, app_key: &str) -> Result<Option<PlatformAccount>>;

    async fn get_by_account_name(
        &self,
        platform_code: &str,
        account_name: &str,
    ) -> Result<Option<PlatformAccount>>;
}

/// 商品路由仓储接口（只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepositoryTrait: Send + Sync {
    async fn get_route(&self, product_id: i64) -> Result<Option<ProductRoute>>;
}
