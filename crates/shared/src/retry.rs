//! 指数退避
//!
//! 同一套策略有两种用法：
//!
//! - `retry_with_policy`：进程内原地重试，只用于启动阶段连接数据库这类场景
//! - `next_at` / `delay_for_attempt`：算出重试记录和延迟队列的下一次执行时间，
//!   由后台扫描或延迟队列驱动，不阻塞处理循环

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// 第 N 次等待 `initial_delay * multiplier^N`，封顶 `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外最多再试几次
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 1、2、4、8 分钟……的退避，充值重试与通知重推共用
    pub fn minutes(max_retries: u32, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(60),
            max_delay,
            multiplier: 2.0,
        }
    }

    /// attempt 从 0 起算
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn next_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.delay_for_attempt(attempt))
            .unwrap_or_else(|_| chrono::Duration::minutes(1))
    }
}

/// 原地重试异步操作
///
/// `is_retryable` 返回 false 的错误直接向上抛出；重试次数用尽时返回最后一次的错误。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || !policy.should_retry(attempt) {
            warn!(operation = operation_name, attempt, error = %err, "放弃重试");
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
