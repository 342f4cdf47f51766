//! 异步队列
//!
//! 解耦订单创建与充值执行、分发通知推送。契约为至少一次投递，消费者必须幂等。
//!
//! - [`RedisQueue`]：每个队列一个 LIST（LPUSH / RPOP 保证 FIFO），延迟消息放在
//!   `<queue>:delayed` 有序集合中，到期后由 Lua 脚本原子地搬回 LIST。
//! - [`MemoryQueue`]：进程内实现，用于测试和单机运行。
//!
//! 消息统一以 JSON 字符串存储。解码时同时兼容"裸 JSON"和"被 JSON 字符串再包一层"的历史格式。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Client, Script};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SharedError};

/// 队列契约
#[async_trait]
pub trait Queue: Send + Sync {
    /// 入队
    async fn push(&self, queue: &str, payload: String) -> Result<()>;

    /// 出队，队列为空时最多等待 `timeout`，超时返回 None
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// 查看队头元素但不移除
    async fn peek(&self, queue: &str) -> Result<Option<String>>;

    /// 延迟入队，`delay` 之后才对 pop 可见
    async fn push_with_delay(&self, queue: &str, payload: String, delay: Duration) -> Result<()>;

    /// 当前可消费的元素数量（不含延迟中的元素）
    async fn length(&self, queue: &str) -> Result<u64>;

    /// 移除所有与 payload 相同的元素，返回移除数量
    async fn remove(&self, queue: &str, payload: &str) -> Result<u64>;

    /// 清空队列（含延迟集合）
    async fn clear(&self, queue: &str) -> Result<()>;
}

/// 带类型的 JSON 读写辅助
#[async_trait]
pub trait QueueExt: Queue {
    async fn push_json<T: Serialize + Sync>(&self, queue: &str, value: &T) -> Result<()> {
        self.push(queue, encode(value)?).await
    }

    async fn push_json_with_delay<T: Serialize + Sync>(
        &self,
        queue: &str,
        value: &T,
        delay: Duration,
    ) -> Result<()> {
        self.push_with_delay(queue, encode(value)?, delay).await
    }

    /// 出队并解码；消息无法解码时记录日志并丢弃，返回 Ok(None)
    async fn pop_json<T: DeserializeOwned>(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let Some(raw) = self.pop(queue, timeout).await? else {
            return Ok(None);
        };
        match decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(queue, payload = %raw, error = %e, "队列消息解码失败，已丢弃");
                Ok(None)
            }
        }
    }
}

impl<Q: Queue + ?Sized> QueueExt for Q {}

/// 序列化为队列消息
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// 解码队列消息
///
/// 先按目标类型直接解析；失败时再尝试把它当作 JSON 字符串，取出内层再解析一次。
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    match serde_json::from_str::<T>(raw) {
        Ok(value) => Ok(value),
        Err(direct_err) => match serde_json::from_str::<String>(raw) {
            Ok(inner) => Ok(serde_json::from_str::<T>(&inner)?),
            Err(_) => Err(SharedError::Codec(direct_err)),
        },
    }
}

fn delayed_key(queue: &str) -> String {
    format!("{}:delayed", queue)
}

// ---------------------------------------------------------------------------
// RedisQueue
// ---------------------------------------------------------------------------

/// 到期延迟消息搬运脚本：ZRANGEBYSCORE + ZREM + LPUSH 在一个原子步骤内完成
const PROMOTE_SCRIPT: &str = r#"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, item in ipairs(items) do
    redis.call('ZREM', KEYS[1], item)
    redis.call('LPUSH', KEYS[2], item)
end
return #items
"#;

/// 单次搬运的延迟消息上限
const PROMOTE_BATCH: i64 = 100;

/// Redis 队列实现
#[derive(Clone)]
pub struct RedisQueue {
    client: Client,
    poll_interval: Duration,
}

impl RedisQueue {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// 设置空队列时的轮询间隔
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// 把已到期的延迟消息搬回主队列
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        queue: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let moved: i64 = Script::new(PROMOTE_SCRIPT)
            .key(delayed_key(queue))
            .key(queue)
            .arg(now)
            .arg(PROMOTE_BATCH)
            .invoke_async(conn)
            .await?;
        if moved > 0 {
            debug!(queue, moved, "延迟消息已到期入队");
        }
        Ok(moved)
    }
}

#[async_trait]
impl Queue for RedisQueue {
    #[instrument(skip(self, payload))]
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(queue, payload).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let deadline = Instant::now() + timeout;

        loop {
            self.promote_due(&mut conn, queue).await?;

            let item: Option<String> = conn.rpop(queue, None).await?;
            if item.is_some() {
                return Ok(item);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn peek(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let items: Vec<String> = conn.lrange(queue, -1, -1).await?;
        Ok(items.into_iter().next())
    }

    #[instrument(skip(self, payload))]
    async fn push_with_delay(&self, queue: &str, payload: String, delay: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let due = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let _: () = conn.zadd(delayed_key(queue), payload, due).await?;
        Ok(())
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(queue).await?)
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.lrem(queue, 0, payload).await?;
        let delayed: u64 = conn.zrem(delayed_key(queue), payload).await?;
        Ok(removed + delayed)
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(vec![queue.to_string(), delayed_key(queue)]).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    ready: HashMap<String, VecDeque<String>>,
    delayed: HashMap<String, Vec<(Instant, String)>>,
}

impl MemoryState {
    fn promote_due(&mut self, queue: &str, now: Instant) {
        let Some(delayed) = self.delayed.get_mut(queue) else {
            return;
        };
        let mut due = Vec::new();
        delayed.retain(|(at, payload)| {
            if *at <= now {
                due.push((*at, payload.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        let ready = self.ready.entry(queue.to_string()).or_default();
        for (_, payload) in due {
            ready.push_front(payload);
        }
    }

    fn next_due(&self, queue: &str) -> Option<Instant> {
        self.delayed
            .get(queue)
            .and_then(|items| items.iter().map(|(at, _)| *at).min())
    }
}

/// 进程内队列实现
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        self.state
            .lock()
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_front(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            // 先注册等待再检查状态，避免丢失检查与等待之间的 push 通知
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.promote_due(queue, now);
                if let Some(item) = state.ready.get_mut(queue).and_then(|q| q.pop_back()) {
                    return Ok(Some(item));
                }
                if now >= deadline {
                    return Ok(None);
                }
                state
                    .next_due(queue)
                    .map_or(deadline, |due| due.min(deadline))
            };

            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn peek(&self, queue: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .ready
            .get(queue)
            .and_then(|q| q.back().cloned()))
    }

    async fn push_with_delay(&self, queue: &str, payload: String, delay: Duration) -> Result<()> {
        self.state
            .lock()
            .delayed
            .entry(queue.to_string())
            .or_default()
            .push((Instant::now() + delay, payload));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .ready
            .get(queue)
            .map_or(0, |q| q.len() as u64))
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<u64> {
        let mut state = self.state.lock();
        let mut removed = 0u64;
        if let Some(ready) = state.ready.get_mut(queue) {
            let before = ready.len();
            ready.retain(|item| item != payload);
            removed += (before - ready.len()) as u64;
        }
        if let Some(delayed) = state.delayed.get_mut(queue) {
            let before = delayed.len();
            delayed.retain(|(_, item)| item != payload);
            removed += (before - delayed.len()) as u64;
        }
        Ok(removed)
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ready.remove(queue);
        state.delayed.remove(queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Task {
        order_id: i64,
    }

    #[test]
    fn test_decode_accepts_wrapped_json_string() {
        let direct: Task = decode(r#"{"order_id":7}"#).unwrap();
        assert_eq!(direct, Task { order_id: 7 });

        let wrapped: Task = decode(r#""{\"order_id\":7}""#).unwrap();
        assert_eq!(wrapped, Task { order_id: 7 });

        assert!(decode::<Task>("not json").is_err());
    }

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.push_json("q", &Task { order_id: 1 }).await.unwrap();
        queue.push_json("q", &Task { order_id: 2 }).await.unwrap();
        assert_eq!(queue.length("q").await.unwrap(), 2);
        assert_eq!(
            queue.peek("q").await.unwrap().as_deref(),
            Some(r#"{"order_id":1}"#)
        );

        let first: Option<Task> = queue.pop_json("q", Duration::from_millis(10)).await.unwrap();
        let second: Option<Task> = queue.pop_json("q", Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, Some(Task { order_id: 1 }));
        assert_eq!(second, Some(Task { order_id: 2 }));
    }

    #[tokio::test]
    async fn test_memory_queue_pop_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let item = queue.pop("empty", Duration::from_millis(20)).await.unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_memory_queue_delayed_item_becomes_visible() {
        let queue = MemoryQueue::new();
        queue
            .push_with_delay("q", "late".to_string(), Duration::from_millis(30))
            .await
            .unwrap();

        // 延迟期内不可见
        assert_eq!(queue.length("q").await.unwrap(), 0);
        assert!(queue.pop("q", Duration::from_millis(5)).await.unwrap().is_none());

        let item = queue.pop("q", Duration::from_millis(500)).await.unwrap();
        assert_eq!(item.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_memory_queue_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("q", "hello".to_string()).await.unwrap();
        });

        let item = queue.pop("q", Duration::from_secs(2)).await.unwrap();
        assert_eq!(item.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_memory_queue_remove_and_clear() {
        let queue = MemoryQueue::new();
        queue.push("q", "a".to_string()).await.unwrap();
        queue.push("q", "b".to_string()).await.unwrap();
        queue.push("q", "a".to_string()).await.unwrap();
        queue
            .push_with_delay("q", "a".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(queue.remove("q", "a").await.unwrap(), 3);
        assert_eq!(queue.length("q").await.unwrap(), 1);

        tokio_test::assert_ok!(queue.clear("q").await);
        assert_eq!(queue.length("q").await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis
    async fn test_redis_queue_roundtrip() {
        let client = Client::open("redis://localhost:6379").unwrap();
        let queue = RedisQueue::new(client);
        queue.clear("test_queue").await.unwrap();
        queue.push("test_queue", "x".to_string()).await.unwrap();
        let item = queue.pop("test_queue", Duration::from_secs(1)).await.unwrap();
        assert_eq!(item.as_deref(), Some("x"));
    }
}
