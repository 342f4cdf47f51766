//! 充值重试记录
//!
//! 派单遇到瞬时错误后由这里接管：首次失败创建记录（计为第 1 次尝试），
//! 之后每次失败按 2^N 退避重新排期，达到上限后关闭记录，由调用方把订单终结为失败。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recharge_shared::config::WorkerConfig;
use recharge_shared::retry::RetryPolicy;
use tracing::{info, instrument, warn};

use crate::error::{RechargeError, Result};
use crate::models::{RetryRecord, RetryStatus};
use crate::repository::RetryRepositoryTrait;

/// 一次失败之后的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Rescheduled {
        attempt: i32,
        next_retry_at: DateTime<Utc>,
    },
    /// 已达上限，记录已关闭
    Exhausted { attempts: i32 },
}

pub struct RetryService {
    retries: Arc<dyn RetryRepositoryTrait>,
    policy: RetryPolicy,
    max_attempts: i32,
    lease_secs: i64,
}

impl RetryService {
    pub fn new(retries: Arc<dyn RetryRepositoryTrait>, config: &WorkerConfig) -> Self {
        let max_attempts = config.max_retries.max(1);
        let base = Duration::from_secs(config.retry_base_delay_secs.max(1));
        Self {
            retries,
            policy: RetryPolicy {
                max_retries: max_attempts as u32,
                initial_delay: base,
                max_delay: base * 2u32.pow(max_attempts.min(16) as u32),
                multiplier: 2.0,
            },
            max_attempts,
            lease_secs: config.retry_lease_secs.max(1),
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// 首次派单失败后接管订单
    ///
    /// 已有未关闭记录时原样返回其排期，不重复计数。
    #[instrument(skip(self, error), fields(order_id = order_id))]
    pub async fn schedule(&self, order_id: i64, error: &RechargeError) -> Result<RetryDecision> {
        if let Some(open) = self.retries.find_open(order_id).await? {
            return Ok(RetryDecision::Rescheduled {
                attempt: open.attempt_count,
                next_retry_at: open.next_retry_at,
            });
        }

        let now = Utc::now();
        let message = error.to_string();
        let record = self
            .retries
            .create(order_id, self.max_attempts, self.policy.next_at(0, now), &message)
            .await?;

        if record.exhausted() {
            self.retries
                .close(record.id, RetryStatus::Failed, &message)
                .await?;
            warn!(attempts = record.attempt_count, "重试次数已用尽");
            return Ok(RetryDecision::Exhausted {
                attempts: record.attempt_count,
            });
        }

        info!(next_retry_at = %record.next_retry_at, error = %message, "已创建重试记录");
        Ok(RetryDecision::Rescheduled {
            attempt: record.attempt_count,
            next_retry_at: record.next_retry_at,
        })
    }

    /// 领取到期记录
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<RetryRecord>> {
        self.retries.claim_due(now, limit, self.lease_secs).await
    }

    /// 提交前确认仍持有领取时的租约
    ///
    /// `claim_due` 返回的记录里 next_retry_at 就是租约到期时间，同时充当租约凭证。
    pub async fn hold_lease(&self, record: &RetryRecord, now: DateTime<Utc>) -> Result<bool> {
        self.retries
            .hold_lease(record.id, record.next_retry_at, now)
            .await
    }

    /// 记录一次失败的重试
    #[instrument(skip(self, record, error), fields(order_id = record.order_id, attempt = record.attempt_count + 1))]
    pub async fn record_failure(
        &self,
        record: &RetryRecord,
        error: &RechargeError,
    ) -> Result<RetryDecision> {
        let now = Utc::now();
        let attempt = record.attempt_count + 1;
        let message = error.to_string();

        if attempt >= record.max_retries {
            self.retries
                .record_failure(record.id, attempt, now, &message)
                .await?;
            self.retries
                .close(record.id, RetryStatus::Failed, &message)
                .await?;
            warn!(attempts = attempt, error = %message, "重试次数已用尽");
            return Ok(RetryDecision::Exhausted { attempts: attempt });
        }

        let next_retry_at = self.policy.next_at((attempt - 1) as u32, now);
        self.retries
            .record_failure(record.id, attempt, next_retry_at, &message)
            .await?;
        info!(next_retry_at = %next_retry_at, error = %message, "重试失败，已重新排期");
        Ok(RetryDecision::Rescheduled {
            attempt,
            next_retry_at,
        })
    }

    pub async fn close_success(&self, record: &RetryRecord) -> Result<()> {
        self.retries
            .close(record.id, RetryStatus::Success, &record.last_error)
            .await
    }

    pub async fn close_failed(&self, record: &RetryRecord, reason: &str) -> Result<()> {
        self.retries
            .close(record.id, RetryStatus::Failed, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockRetryRepositoryTrait;

    fn transient() -> RechargeError {
        RechargeError::TransientProvider {
            platform: "kekebang".to_string(),
            message: "timeout".to_string(),
        }
    }

    fn record(attempt_count: i32, max_retries: i32) -> RetryRecord {
        let now = Utc::now();
        RetryRecord {
            id: 1,
            order_id: 10,
            attempt_count,
            max_retries,
            next_retry_at: now,
            last_error: String::new(),
            status: RetryStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn config(max_retries: i32) -> WorkerConfig {
        WorkerConfig {
            max_retries,
            retry_base_delay_secs: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_schedule_creates_first_attempt() {
        let mut repo = MockRetryRepositoryTrait::new();
        repo.expect_find_open().returning(|_| Ok(None));
        repo.expect_create()
            .withf(|order_id, max, _, error| *order_id == 10 && *max == 3 && error.contains("timeout"))
            .times(1)
            .returning(|_, max, next, _| {
                let mut r = record(1, max);
                r.next_retry_at = next;
                Ok(r)
            });
        repo.expect_close().never();

        let service = RetryService::new(Arc::new(repo), &config(3));
        let before = Utc::now();
        match service.schedule(10, &transient()).await.unwrap() {
            RetryDecision::Rescheduled {
                attempt,
                next_retry_at,
            } => {
                assert_eq!(attempt, 1);
                assert!(next_retry_at >= before + chrono::Duration::seconds(59));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schedule_with_single_attempt_is_exhausted() {
        let mut repo = MockRetryRepositoryTrait::new();
        repo.expect_find_open().returning(|_| Ok(None));
        repo.expect_create()
            .returning(|_, max, _, _| Ok(record(1, max)));
        repo.expect_close()
            .withf(|_, status, _| *status == RetryStatus::Failed)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = RetryService::new(Arc::new(repo), &config(1));
        assert_eq!(
            service.schedule(10, &transient()).await.unwrap(),
            RetryDecision::Exhausted { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_hold_lease_uses_claimed_deadline() {
        let leased = record(1, 3);
        let deadline = leased.next_retry_at;

        let mut repo = MockRetryRepositoryTrait::new();
        repo.expect_hold_lease()
            .withf(move |id, until, _| *id == 1 && *until == deadline)
            .times(1)
            .returning(|_, until, now| Ok(until > now));

        let service = RetryService::new(Arc::new(repo), &config(3));
        assert!(
            service
                .hold_lease(&leased, deadline - chrono::Duration::seconds(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_record_failure_backs_off_then_exhausts() {
        let mut repo = MockRetryRepositoryTrait::new();
        repo.expect_record_failure().returning(|_, _, _, _| Ok(()));
        repo.expect_close()
            .withf(|_, status, _| *status == RetryStatus::Failed)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = RetryService::new(Arc::new(repo), &config(3));

        let before = Utc::now();
        match service.record_failure(&record(1, 3), &transient()).await.unwrap() {
            RetryDecision::Rescheduled {
                attempt,
                next_retry_at,
            } => {
                assert_eq!(attempt, 2);
                // 第二次尝试失败后等待 2 个基础间隔
                assert!(next_retry_at >= before + chrono::Duration::seconds(119));
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        assert_eq!(
            service.record_failure(&record(2, 3), &transient()).await.unwrap(),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }
}
