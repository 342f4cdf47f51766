//! Redis 分布式锁（PostgreSQL 后备）
//!
//! Redis 可用时使用 `SET NX PX`；Redis 出错时降级到 `distributed_locks` 表。
//! Redis 明确返回锁被占用时不再尝试数据库，避免两个后端各自发放同一把锁。

use std::time::Duration;

use async_trait::async_trait;
use redis::Client as RedisClient;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::lock_manager::{DistributedLock, LockBackend, LockToken};
use crate::error::{RechargeError, Result};

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

pub struct RedisLock {
    redis_client: Option<RedisClient>,
    pool: PgPool,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl RedisLock {
    /// `redis_client` 为 None 时只使用数据库锁
    pub fn new(redis_client: Option<RedisClient>, pool: PgPool) -> Self {
        Self {
            redis_client,
            pool,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    fn redis_key(key: &str) -> String {
        format!("lock:{key}")
    }

    fn new_owner(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }

    async fn try_redis(
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn try_db(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| RechargeError::Internal(e.to_string()))?;

        let deleted =
            sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND expires_at < NOW()")
                .bind(key)
                .execute(&self.pool)
                .await?;
        if deleted.rows_affected() > 0 {
            debug!(key = %key, "清理过期数据库锁");
        }

        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_key, owner_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_redis(&self, client: &RedisClient, token: &LockToken) -> Result<bool> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let removed: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::redis_key(&token.key))
            .arg(&token.owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn release_db(&self, token: &LockToken) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND owner_id = $2")
                .bind(&token.key)
                .bind(&token.owner)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let owner = self.new_owner();

        if let Some(client) = &self.redis_client {
            match Self::try_redis(client, key, &owner, ttl).await {
                Ok(true) => {
                    return Ok(Some(LockToken {
                        key: key.to_string(),
                        owner,
                        backend: LockBackend::Redis,
                    }));
                }
                Ok(false) => return Ok(None),
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis 加锁失败，降级到数据库锁");
                }
            }
        }

        if self.try_db(key, &owner, ttl).await? {
            Ok(Some(LockToken {
                key: key.to_string(),
                owner,
                backend: LockBackend::Database,
            }))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        match (token.backend, &self.redis_client) {
            (LockBackend::Redis, Some(client)) => self.release_redis(client, token).await,
            (LockBackend::Database, _) => self.release_db(token).await,
            (backend, _) => Err(RechargeError::Internal(format!(
                "无法释放 {backend:?} 后端的锁"
            ))),
        }
    }
}
