//! nonce 防重放
//!
//! 生产环境使用 Redis `SET NX EX`，多实例共享；测试与单机运行使用进程内实现。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use recharge_shared::cache::{Cache, CacheKey};

use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// 记录一个 nonce；窗口内首次出现返回 true
    async fn remember(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<bool>;
}

#[async_trait]
impl NonceStore for Cache {
    async fn remember(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<bool> {
        let key = CacheKey::partner_nonce(app_id, nonce);
        Ok(self.set_nx(&key, &1u8, ttl).await?)
    }
}

/// 进程内 nonce 表
#[derive(Default)]
pub struct MemoryNonceStore {
    seen: DashMap<String, Instant>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn remember(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        self.seen.retain(|_, expires_at| *expires_at > now);

        let key = CacheKey::partner_nonce(app_id, nonce);
        let mut fresh = false;
        self.seen.entry(key).or_insert_with(|| {
            fresh = true;
            now + ttl
        });
        Ok(fresh)
    }
}
