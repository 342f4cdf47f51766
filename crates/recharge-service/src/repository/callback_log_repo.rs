//! 回调日志仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::CallbackLogRepositoryTrait;
use crate::error::Result;
use crate::models::{CallbackLog, CallbackOutcome, NewCallbackLog};

pub struct CallbackLogRepository {
    pool: PgPool,
}

impl CallbackLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallbackLogRepositoryTrait for CallbackLogRepository {
    async fn insert(&self, log: NewCallbackLog) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO callback_logs (platform_code, order_number, raw_payload, parsed_status, outcome, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&log.platform_code)
        .bind(&log.order_number)
        .bind(&log.raw_payload)
        .bind(log.parsed_status)
        .bind(log.outcome)
        .bind(&log.error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list_by_outcome(
        &self,
        outcome: CallbackOutcome,
        limit: i64,
    ) -> Result<Vec<CallbackLog>> {
        let logs = sqlx::query_as::<_, CallbackLog>(
            r#"
            SELECT id, platform_code, order_number, raw_payload, parsed_status, outcome,
                   error_message, created_at
            FROM callback_logs
            WHERE outcome = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(outcome)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
