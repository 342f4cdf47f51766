//! 数据访问层
//!
//! 每个仓储一个 PostgreSQL 实现，服务层通过 `traits` 中的接口依赖它们。

mod balance_repo;
mod callback_log_repo;
mod notification_repo;
mod order_repo;
mod platform_account_repo;
mod product_repo;
mod retry_repo;
pub mod traits;

pub use balance_repo::BalanceRepository;
pub use callback_log_repo::CallbackLogRepository;
pub use notification_repo::NotificationRepository;
pub use order_repo::OrderRepository;
pub use platform_account_repo::PlatformAccountRepository;
pub use product_repo::ProductRepository;
pub use retry_repo::RetryRepository;
pub use traits::*;
