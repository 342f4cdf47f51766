//! 进程内锁
//!
//! 单实例部署与测试使用，语义与 Redis 锁一致：带 TTL、按 owner 释放。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::lock_manager::{DistributedLock, LockBackend, LockToken};
use crate::error::Result;

#[derive(Default)]
pub struct LocalLock {
    /// key -> (owner, 过期时刻)
    entries: DashMap<String, (String, Instant)>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let now = Instant::now();
        let owner = Uuid::new_v4().to_string();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().1 > now {
                    return Ok(None);
                }
                occupied.insert((owner.clone(), now + ttl));
            }
            Entry::Vacant(vacant) => {
                vacant.insert((owner.clone(), now + ttl));
            }
        }

        Ok(Some(LockToken {
            key: key.to_string(),
            owner,
            backend: LockBackend::Local,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(&token.key, |_, (owner, _)| owner == &token.owner)
            .is_some())
    }
}
