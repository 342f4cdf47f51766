//! 通知任务池
//!
//! 分发循环从通知队列出队，把记录 id 送进有界通道，固定数量的 worker 共享接收端。
//! 每个 worker 以数据库状态为准：只处理 pending 记录，并用 CAS 认领为 processing。
//! 失败按 2^retry_count 分钟退避，通过延迟队列重新入队，不在热路径上 sleep。
//!
//! 分发循环同时做补偿扫描：把卡在 processing 的记录放回 pending，
//! 并把过了重试时间仍未被处理的记录重新送入通道。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recharge_service::models::{NotificationRecord, NotificationStatus, PlatformAccount};
use recharge_service::repository::{NotificationRepositoryTrait, PlatformAccountRepositoryTrait};
use recharge_shared::config::AppConfig;
use recharge_shared::observability::metrics;
use recharge_shared::queue::{Queue, QueueExt};
use recharge_shared::retry::RetryPolicy;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::sender::NotificationSender;
use crate::templates::TemplateEngine;

/// 队列读取失败后的退避
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 一次处理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 合作方已接收
    Delivered,
    /// 无需推送（合作方拉取，或该状态在渠道协议中无对应推送）
    NotRequired,
    /// 记录不存在、不是 pending 或被其他 worker 认领
    Skipped,
    /// 已安排下一次推送
    Rescheduled { retry_count: i32, delay: Duration },
    /// 终态失败
    Failed,
}

impl Delivery {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::NotRequired => "not_required",
            Self::Skipped => "skipped",
            Self::Rescheduled { .. } => "rescheduled",
            Self::Failed => "failed",
        }
    }
}

/// 第 retry_count 次失败后的等待时间：2^retry_count 分钟，不超过上限
pub fn backoff_delay(retry_count: i32, max_delay: Duration) -> Duration {
    RetryPolicy::minutes(0, max_delay).delay_for_attempt(retry_count.max(0) as u32)
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub workers: usize,
    pub channel_capacity: usize,
    pub max_retries: i32,
    pub max_delay: Duration,
    pub queue_name: String,
    pub pop_timeout: Duration,
    /// 补偿扫描间隔
    pub sweep_interval: Duration,
    /// processing 超过该时长视为 worker 中途退出
    pub processing_timeout: chrono::Duration,
    /// 重试时间过后再等待多久才由扫描补投，留给延迟队列先送达
    pub sweep_grace: chrono::Duration,
    pub sweep_batch: i64,
}

impl TaskSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.worker.notification_workers.max(1),
            channel_capacity: config.worker.notification_channel_capacity.max(1),
            max_retries: config.worker.notification_max_retries.max(0),
            max_delay: Duration::from_secs(config.worker.notification_max_delay_secs.max(60)),
            queue_name: config.queue.notification_queue.clone(),
            pop_timeout: config.queue.pop_timeout(),
            ..Self::default()
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            channel_capacity: 100,
            max_retries: 5,
            max_delay: Duration::from_secs(3600),
            queue_name: "notification_queue".to_string(),
            pop_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            processing_timeout: chrono::Duration::minutes(5),
            sweep_grace: chrono::Duration::minutes(1),
            sweep_batch: 100,
        }
    }
}

pub struct NotificationTask {
    notifications: Arc<dyn NotificationRepositoryTrait>,
    accounts: Arc<dyn PlatformAccountRepositoryTrait>,
    sender: Arc<dyn NotificationSender>,
    templates: TemplateEngine,
    queue: Arc<dyn Queue>,
    settings: TaskSettings,
}

impl NotificationTask {
    pub fn new(
        notifications: Arc<dyn NotificationRepositoryTrait>,
        accounts: Arc<dyn PlatformAccountRepositoryTrait>,
        sender: Arc<dyn NotificationSender>,
        templates: TemplateEngine,
        queue: Arc<dyn Queue>,
        settings: TaskSettings,
    ) -> Self {
        Self {
            notifications,
            accounts,
            sender,
            templates,
            queue,
            settings,
        }
    }

    /// 运行直到收到关闭信号；通道中已分发的记录会先处理完
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel::<i64>(self.settings.channel_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers: Vec<JoinHandle<()>> = (0..self.settings.workers)
            .map(|worker_id| {
                let task = self.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(id) = next else { break };
                        task.handle(id).await;
                    }
                    debug!(worker_id, "通知 worker 已退出");
                })
            })
            .collect();

        let mut sweeper = tokio::time::interval(self.settings.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            queue = %self.settings.queue_name,
            workers = self.settings.workers,
            "通知任务已启动"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                _ = sweeper.tick() => {
                    match self.sweep().await {
                        Ok(ids) => {
                            for id in ids {
                                if tx.send(id).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => error!(error = %e, "通知补偿扫描失败"),
                    }
                }

                popped = self.queue.pop_json::<NotificationRecord>(&self.settings.queue_name, self.settings.pop_timeout) => {
                    match popped {
                        Ok(Some(record)) => {
                            if tx.send(record.id).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "读取通知队列失败");
                            tokio::time::sleep(POP_ERROR_BACKOFF).await;
                        }
                    }
                    metrics::set_worker_last_run("notification_task");
                }
            }
        }

        drop(tx);
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "通知 worker 异常退出");
            }
        }
        info!("通知任务已停止");
    }

    /// 补偿扫描，返回需要重新分发的记录 id
    pub async fn sweep(&self) -> Result<Vec<i64>> {
        let now = Utc::now();
        let reset = self
            .notifications
            .reset_stale_processing(now - self.settings.processing_timeout)
            .await?;
        if reset > 0 {
            warn!(count = reset, "处理中超时的通知已放回待处理");
        }

        let due = self
            .notifications
            .list_due_pending(now - self.settings.sweep_grace, self.settings.sweep_batch)
            .await?;
        if !due.is_empty() {
            info!(count = due.len(), "补投遗漏的通知");
        }
        Ok(due.into_iter().map(|r| r.id).collect())
    }

    /// 处理一条记录；错误在这里收口，processing 状态由补偿扫描回收
    pub async fn handle(&self, id: i64) {
        match self.process(id).await {
            Ok(delivery) => debug!(notification_id = id, ?delivery, "通知处理完成"),
            Err(e) => {
                error!(notification_id = id, error = %e, "通知处理失败");
                metrics::record_notification("unknown", "error");
            }
        }
    }

    pub async fn process(&self, id: i64) -> Result<Delivery> {
        let Some(record) = self.notifications.get(id).await? else {
            warn!(notification_id = id, "通知记录不存在");
            return Ok(Delivery::Skipped);
        };
        if record.status != NotificationStatus::Pending {
            debug!(notification_id = id, status = ?record.status, "通知不是待处理状态，跳过");
            return Ok(Delivery::Skipped);
        }
        if !self.notifications.claim(id).await? {
            debug!(notification_id = id, "通知已被其他 worker 认领");
            return Ok(Delivery::Skipped);
        }

        let content = match record.parse_content() {
            Ok(content) => content,
            Err(e) => return self.fail(&record, &format!("通知内容解析失败: {e}")).await,
        };

        let account = match self.accounts.get(content.platform_account_id).await? {
            Some(account) if account.is_active() => account,
            _ => {
                return self
                    .fail(&record, &format!("合作方账号不可用: {}", content.platform_account_id))
                    .await;
            }
        };
        if !account.push_enabled() {
            return self.finish(&record, &account, Delivery::NotRequired).await;
        }

        let request = match self.templates.render(&record, &content, &account, Utc::now()) {
            Ok(Some(request)) => request,
            Ok(None) => return self.finish(&record, &account, Delivery::NotRequired).await,
            Err(e) => return self.fail(&record, &e.to_string()).await,
        };

        match self.sender.send(&request).await {
            Ok(()) => {
                info!(
                    notification_id = id,
                    order_number = %content.order_number,
                    url = %request.url,
                    "通知已送达"
                );
                self.finish(&record, &account, Delivery::Delivered).await
            }
            Err(e) if !e.is_retryable() => {
                warn!(notification_id = id, error = %e, "合作方明确拒收，不再重推");
                self.fail(&record, &e.to_string()).await
            }
            Err(e) if record.retry_count < self.settings.max_retries => {
                let delay = backoff_delay(record.retry_count, self.settings.max_delay);
                let retry_count = record.retry_count + 1;
                let next_retry_time = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::minutes(1));
                self.notifications
                    .mark_retry(id, retry_count, next_retry_time, &e.to_string())
                    .await?;

                let mut pending = record.clone();
                pending.status = NotificationStatus::Pending;
                pending.retry_count = retry_count;
                pending.next_retry_time = next_retry_time;
                self.queue
                    .push_json_with_delay(&self.settings.queue_name, &pending, delay)
                    .await?;
                metrics::record_notification(&record.platform_code, "rescheduled");

                warn!(
                    notification_id = id,
                    retry_count,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "通知推送失败，已安排重推"
                );
                Ok(Delivery::Rescheduled { retry_count, delay })
            }
            Err(e) => {
                warn!(notification_id = id, retry_count = record.retry_count, "通知重推次数已用尽");
                self.fail(&record, &e.to_string()).await
            }
        }
    }

    async fn finish(
        &self,
        record: &NotificationRecord,
        account: &PlatformAccount,
        delivery: Delivery,
    ) -> Result<Delivery> {
        self.notifications.mark_success(record.id).await?;
        metrics::record_notification(&account.platform_code, delivery.outcome());
        Ok(delivery)
    }

    async fn fail(&self, record: &NotificationRecord, reason: &str) -> Result<Delivery> {
        self.notifications.mark_failed(record.id, reason).await?;
        metrics::record_notification(&record.platform_code, "failed");
        Ok(Delivery::Failed)
    }
}
