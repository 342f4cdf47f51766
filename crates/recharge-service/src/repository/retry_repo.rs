//! 重试记录仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::RetryRepositoryTrait;
use crate::error::Result;
use crate::models::{RetryRecord, RetryStatus};

const RETRY_COLUMNS: &str = r#"
    id, order_id, attempt_count, max_retries, next_retry_at, last_error, status,
    created_at, updated_at
"#;

/// 重试记录仓储
pub struct RetryRepository {
    pool: PgPool,
}

impl RetryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetryRepositoryTrait for RetryRepository {
    async fn create(
        &self,
        order_id: i64,
        max_retries: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<RetryRecord> {
        // 部分唯一索引保证一个订单只有一条未关闭记录；已存在时直接返回它
        let inserted = sqlx::query_as::<_, RetryRecord>(&format!(
            r#"
            INSERT INTO retry_records (order_id, attempt_count, max_retries, next_retry_at, last_error, status)
            VALUES ($1, 1, $2, $3, $4, $5)
            ON CONFLICT (order_id) WHERE status = 0 DO NOTHING
            RETURNING {RETRY_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(max_retries)
        .bind(next_retry_at)
        .bind(last_error)
        .bind(RetryStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(record) => Ok(record),
            None => {
                let existing = sqlx::query_as::<_, RetryRecord>(&format!(
                    "SELECT {RETRY_COLUMNS} FROM retry_records WHERE order_id = $1 AND status = $2"
                ))
                .bind(order_id)
                .bind(RetryStatus::Pending)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing)
            }
        }
    }

    async fn find_open(&self, order_id: i64) -> Result<Option<RetryRecord>> {
        let record = sqlx::query_as::<_, RetryRecord>(&format!(
            "SELECT {RETRY_COLUMNS} FROM retry_records WHERE order_id = $1 AND status = $2"
        ))
        .bind(order_id)
        .bind(RetryStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<RetryRecord>> {
        // SKIP LOCKED 让多个实例并行扫描时互不阻塞；领取即推后 next_retry_at 作为租约
        let records = sqlx::query_as::<_, RetryRecord>(&format!(
            r#"
            UPDATE retry_records
            SET next_retry_at = $1 + make_interval(secs => $3), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM retry_records
                WHERE status = $4 AND next_retry_at <= $1
                ORDER BY next_retry_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RETRY_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .bind(lease_secs as f64)
        .bind(RetryStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn hold_lease(
        &self,
        id: i64,
        leased_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE retry_records
            SET updated_at = NOW()
            WHERE id = $1 AND status = $2 AND next_retry_at = $3 AND next_retry_at > $4
            "#,
        )
        .bind(id)
        .bind(RetryStatus::Pending)
        .bind(leased_until)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: i64,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE retry_records
            SET attempt_count = $2, next_retry_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(last_error)
        .bind(RetryStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close(&self, id: i64, status: RetryStatus, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE retry_records
            SET status = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(last_error)
        .bind(RetryStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
