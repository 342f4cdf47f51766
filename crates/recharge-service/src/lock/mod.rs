//! 分布式锁模块
//!
//! 退款与余额结算在锁保护下执行，保证同一订单最多结算一次。
//!
//! - `RedisLock`: Redis `SET NX PX`，Redis 故障时降级到 PostgreSQL
//! - `LocalLock`: 进程内实现，用于单实例与测试
//!
//! ```ignore
//! let manager = LockManager::new(Arc::new(RedisLock::new(Some(client), pool)), LockConfig::default());
//! let guard = manager.acquire("refund:order:123", None).await?;
//! do_settlement().await?;
//! guard.release().await?;
//! ```

mod local_lock;
mod lock_manager;
mod redis_lock;

pub use local_lock::LocalLock;
pub use lock_manager::{DistributedLock, LockBackend, LockConfig, LockGuard, LockManager, LockToken};
pub use redis_lock::RedisLock;

#[cfg(test)]
pub use lock_manager::MockDistributedLock;
