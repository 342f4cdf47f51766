//! 通知记录仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::NotificationRepositoryTrait;
use crate::error::Result;
use crate::models::{NewNotification, NotificationRecord, NotificationStatus};

const NOTIFICATION_COLUMNS: &str = r#"
    id, order_id, platform_code, notification_type, content, status, retry_count,
    next_retry_time, success_at, last_error, created_at, updated_at
"#;

pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Option<NotificationRecord>> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            INSERT INTO notification_records (order_id, platform_code, notification_type, content, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id, notification_type) DO NOTHING
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(notification.order_id)
        .bind(&notification.platform_code)
        .bind(&notification.notification_type)
        .bind(&notification.content)
        .bind(NotificationStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn claim(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_records
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(NotificationStatus::Pending)
        .bind(NotificationStatus::Processing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_success(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_records
            SET status = $2, success_at = NOW(), last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(NotificationStatus::Success)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_time: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_records
            SET status = $2, retry_count = $3, next_retry_time = $4, last_error = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(NotificationStatus::Pending)
        .bind(retry_count)
        .bind(next_retry_time)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_records
            SET status = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(NotificationStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>> {
        let records = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notification_records
            WHERE status = $1 AND next_retry_time <= $2
            ORDER BY next_retry_time ASC
            LIMIT $3
            "#
        ))
        .bind(NotificationStatus::Pending)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn reset_stale_processing(&self, updated_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_records
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND updated_at < $3
            "#,
        )
        .bind(NotificationStatus::Pending)
        .bind(NotificationStatus::Processing)
        .bind(updated_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
