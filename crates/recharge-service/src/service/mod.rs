//! 业务服务层
//!
//! - `order_state`：订单状态机，所有状态写入的唯一入口
//! - `dispatch`：派单、回调与查单
//! - `retry`：瞬时失败后的重试记录
//! - `settlement`：扣款、失败退回与退款
//! - `notify`：结果通知入队
//! - `order_service`：合作方下单

pub mod dispatch;
pub mod dto;
pub mod notify;
pub mod order_service;
pub mod order_state;
pub mod retry;
pub mod settlement;

use std::sync::Arc;

use recharge_shared::config::AppConfig;
use recharge_shared::queue::Queue;
use sqlx::PgPool;

pub use dispatch::{DispatchRepositories, DispatchService, classify_report};
pub use dto::{CallbackHandling, CreateOrderCommand, CreatedOrder, RechargeTask, RefundResult};
pub use notify::NotifyService;
pub use order_service::OrderService;
pub use order_state::{OrderStateMachine, can_transition};
pub use retry::{RetryDecision, RetryService};
pub use settlement::{SettlementService, refund_lock_key};

use crate::lock::LockManager;
use crate::platform::PlatformRegistry;
use crate::repository::{
    BalanceRepository, BalanceRepositoryTrait, CallbackLogRepository, CallbackLogRepositoryTrait,
    NotificationRepository, NotificationRepositoryTrait, OrderRepository, OrderRepositoryTrait,
    PlatformAccountRepository, PlatformAccountRepositoryTrait, ProductRepository,
    ProductRepositoryTrait, RetryRepository, RetryRepositoryTrait,
};

/// 全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepositoryTrait>,
    pub products: Arc<dyn ProductRepositoryTrait>,
    pub accounts: Arc<dyn PlatformAccountRepositoryTrait>,
    pub retries: Arc<dyn RetryRepositoryTrait>,
    pub callback_logs: Arc<dyn CallbackLogRepositoryTrait>,
    pub balances: Arc<dyn BalanceRepositoryTrait>,
    pub notifications: Arc<dyn NotificationRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            orders: Arc::new(OrderRepository::new(pool.clone())),
            products: Arc::new(ProductRepository::new(pool.clone())),
            accounts: Arc::new(PlatformAccountRepository::new(pool.clone())),
            retries: Arc::new(RetryRepository::new(pool.clone())),
            callback_logs: Arc::new(CallbackLogRepository::new(pool.clone())),
            balances: Arc::new(BalanceRepository::new(pool.clone())),
            notifications: Arc::new(NotificationRepository::new(pool)),
        }
    }
}

/// 装配好的服务
#[derive(Clone)]
pub struct Services {
    pub repos: Repositories,
    pub dispatch: Arc<DispatchService>,
    pub retry: Arc<RetryService>,
    pub settlement: Arc<SettlementService>,
    pub notifier: Arc<NotifyService>,
    pub orders: Arc<OrderService>,
}

impl Services {
    pub fn build(
        repos: Repositories,
        registry: Arc<PlatformRegistry>,
        queue: Arc<dyn Queue>,
        locks: Arc<LockManager>,
        config: &AppConfig,
    ) -> Self {
        let notifier = Arc::new(NotifyService::new(
            repos.notifications.clone(),
            queue.clone(),
            config.queue.notification_queue.clone(),
        ));
        let settlement = Arc::new(SettlementService::new(
            repos.balances.clone(),
            OrderStateMachine::new(repos.orders.clone()),
            locks,
            notifier.clone(),
        ));
        let retry = Arc::new(RetryService::new(repos.retries.clone(), &config.worker));
        let dispatch = Arc::new(DispatchService::new(
            DispatchRepositories {
                orders: repos.orders.clone(),
                products: repos.products.clone(),
                retries: repos.retries.clone(),
                callback_logs: repos.callback_logs.clone(),
            },
            registry,
            settlement.clone(),
            notifier.clone(),
            retry.clone(),
            queue,
            config.queue.recharge_queue.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            repos.orders.clone(),
            repos.products.clone(),
            repos.accounts.clone(),
            dispatch.clone(),
        ));

        Self {
            repos,
            dispatch,
            retry,
            settlement,
            notifier,
            orders,
        }
    }
}
