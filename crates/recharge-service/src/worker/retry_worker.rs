//! 重试扫描
//!
//! 固定间隔领取到期的重试记录，在租约内重新派单；同一轮还会对长时间停在充值中的订单主动查单，
//! 并把长时间停在待充值的订单放回充值队列。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recharge_shared::config::WorkerConfig;
use recharge_shared::observability::metrics;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::{RechargeError, Result};
use crate::models::{OrderStatus, RetryRecord};
use crate::service::{DispatchService, RetryDecision, RetryService};

/// 一轮扫描的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryTickStats {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// 租约已被其他实例接手
    pub skipped: usize,
    pub polled: usize,
    pub requeued: usize,
}

pub struct RetryWorker {
    dispatch: Arc<DispatchService>,
    retry: Arc<RetryService>,
    interval: Duration,
    batch_size: i64,
    poll_after: chrono::Duration,
}

impl RetryWorker {
    pub fn new(dispatch: Arc<DispatchService>, retry: Arc<RetryService>, config: &WorkerConfig) -> Self {
        Self {
            dispatch,
            retry,
            interval: Duration::from_secs(config.retry_interval_secs.max(1)),
            batch_size: config.retry_batch_size.max(1),
            poll_after: chrono::Duration::seconds(config.status_poll_after_secs.max(1)),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), batch = self.batch_size, "重试扫描已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.claimed > 0 || stats.polled > 0 || stats.requeued > 0 => {
                            info!(?stats, "重试扫描完成");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "重试扫描失败"),
                    }
                    metrics::set_worker_last_run("retry_worker");
                }
            }
        }

        info!("重试扫描已停止");
    }

    /// 执行一轮扫描
    pub async fn run_once(&self) -> Result<RetryTickStats> {
        self.run_once_at(Utc::now()).await
    }

    /// 以指定时间为"现在"执行一轮扫描
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RetryTickStats> {
        let mut stats = RetryTickStats::default();

        let due = self.retry.claim_due(now, self.batch_size).await?;
        stats.claimed = due.len();
        for record in due {
            match self.retry_one(&record, now).await {
                Ok(Some(RetryDecision::Rescheduled { .. })) => stats.rescheduled += 1,
                Ok(Some(RetryDecision::Exhausted { .. })) => stats.exhausted += 1,
                Ok(None) => stats.succeeded += 1,
                Err(RechargeError::RetryLeaseLost { .. }) => stats.skipped += 1,
                Err(e) => {
                    // 记录的租约到期后会被重新领取
                    error!(order_id = record.order_id, error = %e, "处理重试记录失败");
                }
            }
        }

        stats.polled = self
            .dispatch
            .poll_stale_orders(now - self.poll_after, self.batch_size)
            .await?;
        stats.requeued = self
            .dispatch
            .requeue_stale_pending(now - self.poll_after, self.batch_size)
            .await?;

        Ok(stats)
    }

    /// 重新派单；返回 None 表示记录已正常关闭
    ///
    /// 租约失效时原样返回 `RetryLeaseLost`，记录归新的领取者处理。
    async fn retry_one(&self, record: &RetryRecord, now: DateTime<Utc>) -> Result<Option<RetryDecision>> {
        match self.dispatch.resume_recharge_task(record, now).await {
            Err(e @ RechargeError::RetryLeaseLost { .. }) => Err(e),
            Ok(status) => {
                if status == OrderStatus::Failed {
                    self.retry.close_failed(record, "订单已失败").await?;
                } else {
                    self.retry.close_success(record).await?;
                }
                metrics::record_retry("success");
                Ok(None)
            }
            Err(e) if e.is_retryable() => {
                let decision = self.retry.record_failure(record, &e).await?;
                match decision {
                    RetryDecision::Rescheduled { .. } => metrics::record_retry("rescheduled"),
                    RetryDecision::Exhausted { .. } => {
                        metrics::record_retry("exhausted");
                        self.dispatch.fail_order(record.order_id, &e.to_string()).await?;
                    }
                }
                Ok(Some(decision))
            }
            Err(e) => {
                warn!(order_id = record.order_id, error = %e, "重试遇到不可重试错误，关闭记录");
                self.retry.close_failed(record, &e.to_string()).await?;
                metrics::record_retry("aborted");
                if let Err(fail_err) = self.dispatch.fail_order(record.order_id, &e.to_string()).await {
                    warn!(order_id = record.order_id, error = %fail_err, "终结订单失败");
                }
                Ok(Some(RetryDecision::Exhausted {
                    attempts: record.attempt_count,
                }))
            }
        }
    }
}
