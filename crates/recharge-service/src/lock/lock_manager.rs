//! 分布式锁管理器
//!
//! `DistributedLock` 只负责单次加锁与释放；重试、超时与守卫由 `LockManager` 统一处理。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recharge_shared::config::LockSettings;
use tracing::{debug, instrument, warn};

use crate::error::{RechargeError, Result};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 默认锁超时时间
    pub default_ttl: Duration,
    /// 获取锁尝试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&LockSettings> for LockConfig {
    fn from(settings: &LockSettings) -> Self {
        Self {
            default_ttl: Duration::from_secs(settings.ttl_secs),
            retry_count: settings.retry_count.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// 锁实际落在哪个后端，释放时据此走对应路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Redis,
    Database,
    Local,
}

/// 加锁凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub owner: String,
    pub backend: LockBackend,
}

/// 分布式锁后端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试加锁一次；锁被占用时返回 None
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// 释放锁；只有 owner 匹配时才删除，返回是否真正删除
    async fn release(&self, token: &LockToken) -> Result<bool>;
}

/// 锁管理器
pub struct LockManager {
    backend: Arc<dyn DistributedLock>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(backend: Arc<dyn DistributedLock>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    /// 获取锁
    ///
    /// 最多尝试 `retry_count` 次，每次间隔 `retry_delay`，仍未拿到返回 `LockTimeout`。
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> Result<LockGuard> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let attempts = self.config.retry_count.max(1);

        for attempt in 0..attempts {
            if let Some(token) = self.backend.try_acquire(key, ttl).await? {
                debug!(key = %key, owner = %token.owner, backend = ?token.backend, "锁已获取");
                return Ok(LockGuard::new(token, self.backend.clone()));
            }

            if attempt + 1 < attempts {
                debug!(
                    key = %key,
                    attempt = attempt,
                    retry_delay_ms = self.config.retry_delay.as_millis() as u64,
                    "锁被占用，等待重试"
                );
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(RechargeError::LockTimeout {
            resource: key.to_string(),
        })
    }

    /// 在锁保护下执行操作，无论成功失败都会释放锁
    pub async fn with_lock<F, Fut, T>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(key, None).await?;
        let result = op().await;

        if let Err(e) = guard.release().await {
            // 释放失败时锁会随 TTL 过期，不覆盖业务结果
            warn!(key = %key, error = %e, "释放锁失败");
        }

        result
    }
}

/// 锁守卫
///
/// Drop 无法执行异步释放，只能记录警告，锁最终靠 TTL 过期。
/// 正常路径应显式调用 `release()`。
pub struct LockGuard {
    token: LockToken,
    backend: Arc<dyn DistributedLock>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("token", &self.token)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    fn new(token: LockToken, backend: Arc<dyn DistributedLock>) -> Self {
        Self {
            token,
            backend,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.token.key
    }

    pub fn owner(&self) -> &str {
        &self.token.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.token.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let removed = self.backend.release(&self.token).await?;
        if !removed {
            warn!(
                key = %self.token.key,
                owner = %self.token.owner,
                "锁已过期或被其他持有者占用"
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                lock_key = %self.token.key,
                owner = %self.token.owner,
                "LockGuard 未显式释放，锁将随 TTL 过期"
            );
        }
    }
}
