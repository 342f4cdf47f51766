//! 充值重试记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::RetryStatus;

/// 重试记录
///
/// 派单遇到瞬时错误时创建，attempt_count 包含首次尝试。
/// 成功或达到上限后关闭，关闭后不再被扫描。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetryRecord {
    pub id: i64,
    pub order_id: i64,
    pub attempt_count: i32,
    pub max_retries: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryRecord {
    /// 已用尽尝试次数
    pub fn exhausted(&self) -> bool {
        self.attempt_count >= self.max_retries
    }
}
