//! Redis 客户端
//!
//! 一个进程只开一个 `redis::Client`：队列、分布式锁和下单 nonce 防重放各自从它取多路复用连接。

use std::time::Duration;

use redis::Client;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tracing::info;

use crate::config::RedisConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis 客户端已创建");
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// SET NX EX；返回 false 表示键已存在
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serde_json::to_string(value)?)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

/// Redis 键名
pub struct CacheKey;

impl CacheKey {
    /// 下单请求的 nonce，同一合作方在时间窗内不可复用
    pub fn partner_nonce(app_id: &str, nonce: &str) -> String {
        format!("partner:nonce:{app_id}:{nonce}")
    }
}
