//! 充值派单
//!
//! 订单从待充值到最终结果的主链路：
//!
//! 1. `create_recharge_task`：确定履约平台并持久化路由，同步平台当场提交，队列平台推入充值队列
//! 2. `process_recharge_task`：认领订单（PendingRecharge -> Recharging）、扣款、提交上游并映射结果
//! 3. `resume_recharge_task`：重试服务持有租约时重新提交充值中的订单
//! 4. `handle_callback` / `query_order_status`：上游回传或主动查询到的结果统一经
//!    `apply_reported_status` 落到订单上
//!
//! 待充值订单归充值队列，认领靠订单版本 CAS；充值中的订单只能由持有重试租约的一方再次提交。
//! 瞬时错误交给 `RetryService` 接管，不在这里重试；上游明确拒单直接终结为失败。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use recharge_shared::observability::metrics;
use recharge_shared::queue::{Queue, QueueExt};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{RechargeError, Result};
use crate::models::{
    CallbackOutcome, NewCallbackLog, Order, OrderClient, OrderStatus, RetryRecord,
};
use crate::platform::{DispatchMode, PlatformRegistry};
use crate::repository::{
    CallbackLogRepositoryTrait, OrderRepositoryTrait, ProductRepositoryTrait, RetryRepositoryTrait,
};
use crate::service::dto::{CallbackHandling, RechargeTask};
use crate::service::notify::NotifyService;
use crate::service::order_state::{OrderStateMachine, can_transition};
use crate::service::retry::{RetryDecision, RetryService};
use crate::service::settlement::SettlementService;

/// 结果落库时 CAS 冲突的最大重读次数
const MAX_CAS_ATTEMPTS: usize = 3;

/// 认领前失败的任务延迟重投
const REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// 上游报告的状态相对订单当前状态意味着什么
///
/// 订单已经越过报告的结果（例如成功后又退款）时，报告只是旧结果的重放，按重复处理。
pub fn classify_report(current: OrderStatus, reported: OrderStatus) -> CallbackOutcome {
    if current == reported {
        return CallbackOutcome::Duplicate;
    }
    if reported.is_final_outcome() && can_transition(reported, current) {
        return CallbackOutcome::Duplicate;
    }
    if reported == OrderStatus::Recharging {
        return CallbackOutcome::Ignored;
    }
    let in_flight = matches!(current, OrderStatus::Recharging | OrderStatus::Processing);
    if in_flight && can_transition(current, reported) {
        CallbackOutcome::Applied
    } else {
        CallbackOutcome::Conflict
    }
}

pub struct DispatchService {
    orders: Arc<dyn OrderRepositoryTrait>,
    products: Arc<dyn ProductRepositoryTrait>,
    retries: Arc<dyn RetryRepositoryTrait>,
    callback_logs: Arc<dyn CallbackLogRepositoryTrait>,
    registry: Arc<PlatformRegistry>,
    state: OrderStateMachine,
    settlement: Arc<SettlementService>,
    notifier: Arc<NotifyService>,
    retry: Arc<RetryService>,
    queue: Arc<dyn Queue>,
    recharge_queue: String,
}

/// 派单服务依赖的仓储
#[derive(Clone)]
pub struct DispatchRepositories {
    pub orders: Arc<dyn OrderRepositoryTrait>,
    pub products: Arc<dyn ProductRepositoryTrait>,
    pub retries: Arc<dyn RetryRepositoryTrait>,
    pub callback_logs: Arc<dyn CallbackLogRepositoryTrait>,
}

impl DispatchService {
    pub fn new(
        repos: DispatchRepositories,
        registry: Arc<PlatformRegistry>,
        settlement: Arc<SettlementService>,
        notifier: Arc<NotifyService>,
        retry: Arc<RetryService>,
        queue: Arc<dyn Queue>,
        recharge_queue: impl Into<String>,
    ) -> Self {
        Self {
            state: OrderStateMachine::new(repos.orders.clone()),
            orders: repos.orders,
            products: repos.products,
            retries: repos.retries,
            callback_logs: repos.callback_logs,
            registry,
            settlement,
            notifier,
            retry,
            queue,
            recharge_queue: recharge_queue.into(),
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // 派单
    // ------------------------------------------------------------------

    /// 创建充值任务
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn create_recharge_task(&self, order_id: i64) -> Result<Order> {
        let mut order = self.state.reload(order_id).await?;
        if order.status != OrderStatus::PendingRecharge {
            return Err(RechargeError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Recharging,
            });
        }

        let platform_code = match order.platform_code.clone() {
            Some(code) => code,
            None => {
                let route = self
                    .products
                    .get_route(order.product_id)
                    .await?
                    .filter(|r| r.is_on_sale())
                    .ok_or(RechargeError::ProductNotFound(order.product_id))?;
                let routed = self
                    .orders
                    .set_route(
                        order.id,
                        order.version,
                        &route.platform_code,
                        &route.provider_sku,
                    )
                    .await?;
                if !routed {
                    return Err(RechargeError::ConcurrencyConflict);
                }
                order = self.state.reload(order_id).await?;
                info!(platform = %route.platform_code, sku = %route.provider_sku, "订单路由已确定");
                route.platform_code
            }
        };

        let adapter = self.registry.adapter(&platform_code)?;
        let task = RechargeTask::for_order(&order);
        match adapter.dispatch_mode() {
            DispatchMode::Sync => {
                match self.process_recharge_task(order.id).await {
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "同步派单未能认领订单，转入充值队列");
                        self.requeue(&task).await;
                    }
                    Err(e) => return Err(e),
                }
                self.state.reload(order_id).await
            }
            DispatchMode::Queued => {
                self.queue.push_json(&self.recharge_queue, &task).await?;
                info!(platform = %platform_code, "充值任务已入队");
                Ok(order)
            }
        }
    }

    /// 认领前失败的任务延迟放回充值队列
    ///
    /// 重复投递无害：订单认领是版本 CAS，只有一个处理者能把待充值订单改为充值中。
    pub async fn requeue(&self, task: &RechargeTask) {
        match self
            .queue
            .push_json_with_delay(&self.recharge_queue, task, REQUEUE_DELAY)
            .await
        {
            Ok(()) => info!(order_id = task.order_id, "充值任务已延迟重投"),
            Err(e) => {
                error!(order_id = task.order_id, error = %e, "充值任务重投失败，等待待充值扫描");
            }
        }
    }

    /// 执行一次派单，返回处理后的订单状态
    ///
    /// 充值队列与同步平台的入口，只处理待充值订单：以版本 CAS 认领为充值中之后才提交上游。
    /// 订单已不是待充值，或认领时输给了其他处理者，说明订单已有归属，直接返回当前状态，任务丢弃。
    ///
    /// 认领之后的瞬时错误在这里交给重试服务，非瞬时错误把订单终结为失败；
    /// 因此返回的错误都发生在认领之前，订单仍归充值队列。
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn process_recharge_task(&self, order_id: i64) -> Result<OrderStatus> {
        let order = self.state.reload(order_id).await?;
        if order.status != OrderStatus::PendingRecharge {
            debug!(status = %order.status, "订单不在待充值状态，任务丢弃");
            return Ok(order.status);
        }

        let order = match self
            .state
            .transition(&order, OrderStatus::Recharging, "")
            .await
        {
            Ok(order) => order,
            Err(RechargeError::ConcurrencyConflict) => {
                let current = self.state.reload(order_id).await?;
                info!(status = %current.status, "订单已被其他处理者认领，任务丢弃");
                return Ok(current.status);
            }
            Err(e) => return Err(e),
        };

        match self.dispatch_claimed(order).await {
            Err(e) if e.is_retryable() => Ok(self.hand_over(order_id, &e).await),
            other => other,
        }
    }

    /// 持有重试租约时重新派单
    ///
    /// 充值中的订单只能经由这里再次提交上游。提交前以领取时的租约做 CAS，
    /// 租约已失效返回 `RetryLeaseLost`，调用方不得再动这条记录。
    /// 订单已离开充值中时不再提交；失败订单在这里补做余额退回，退回失败按瞬时错误返回。
    #[instrument(skip(self, lease, now), fields(order_id = lease.order_id, attempt = lease.attempt_count))]
    pub async fn resume_recharge_task(
        &self,
        lease: &RetryRecord,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus> {
        let order = self.state.reload(lease.order_id).await?;
        match order.status {
            OrderStatus::Recharging => {}
            OrderStatus::Failed => {
                self.settlement.credit_failed_order(&order).await?;
                return Ok(OrderStatus::Failed);
            }
            other => {
                debug!(status = %other, "订单已离开充值中，不再重试");
                return Ok(other);
            }
        }

        if !self.retry.hold_lease(lease, now).await? {
            warn!("重试租约已被其他实例接手，放弃本次重试");
            return Err(RechargeError::RetryLeaseLost {
                order_id: lease.order_id,
            });
        }

        let status = self.dispatch_claimed(order).await?;
        if status == OrderStatus::Failed {
            let order = self.state.reload(lease.order_id).await?;
            self.settlement.credit_failed_order(&order).await?;
        }
        Ok(status)
    }

    /// 提交已认领的订单并记录派单指标
    async fn dispatch_claimed(&self, order: Order) -> Result<OrderStatus> {
        let platform = order.platform_code.clone().unwrap_or_default();
        let started = Instant::now();
        let result = self.submit_claimed(&order).await;

        let label = match &result {
            Ok(OrderStatus::Success) => "success",
            Ok(OrderStatus::Failed) => "failed",
            Ok(_) => "accepted",
            Err(RechargeError::ConcurrencyConflict) => "conflict",
            Err(e) if e.is_retryable() => "transient",
            Err(_) => "rejected",
        };
        metrics::record_dispatch(&platform, label, started.elapsed().as_secs_f64());

        match result {
            Err(RechargeError::ConcurrencyConflict) => {
                // 结果落库时订单已被回调或查单改写
                let current = self.state.reload(order.id).await?;
                info!(status = %current.status, "订单已被其他处理者更新");
                Ok(current.status)
            }
            Err(e) if !e.is_retryable() => {
                warn!(error = %e, "派单被拒绝，订单终结为失败");
                let (_, order) = self
                    .apply_reported_status(order, OrderStatus::Failed, &e.to_string())
                    .await?;
                Ok(order.status)
            }
            other => other,
        }
    }

    async fn submit_claimed(&self, order: &Order) -> Result<OrderStatus> {
        let code = order
            .platform_code
            .as_deref()
            .ok_or_else(|| RechargeError::PlatformNotFound(String::new()))?;
        let adapter = self.registry.adapter(code)?;

        self.settlement.deduct_for_order(order).await?;

        let outcome = adapter.submit(order).await?;
        if let Some(provider_order) = &outcome.provider_order_number {
            self.orders
                .set_provider_order_number(order.id, provider_order)
                .await?;
        }

        match outcome.status {
            OrderStatus::Success | OrderStatus::Failed => {
                let (_, order) = self
                    .apply_reported_status(order.clone(), outcome.status, &outcome.message)
                    .await?;
                Ok(order.status)
            }
            _ => {
                info!(provider_order = ?outcome.provider_order_number, "上游已受理，等待回调");
                Ok(OrderStatus::Recharging)
            }
        }
    }

    /// 认领后的派单失败交给重试服务；重试次数已用尽时直接终结订单
    ///
    /// 派单链路的错误到此为止，不再向上传播；返回订单此后的状态。
    #[instrument(skip(self, err), fields(order_id = order_id))]
    pub async fn hand_over(&self, order_id: i64, err: &RechargeError) -> OrderStatus {
        match self.retry.schedule(order_id, err).await {
            Ok(RetryDecision::Rescheduled { next_retry_at, .. }) => {
                info!(next_retry_at = %next_retry_at, error = %err, "派单失败，已交给重试服务");
                OrderStatus::Recharging
            }
            Ok(RetryDecision::Exhausted { attempts }) => {
                match self.fail_order(order_id, &err.to_string()).await {
                    Ok(order) => order.status,
                    Err(e) => {
                        error!(attempts, error = %e, "终结订单失败");
                        OrderStatus::Recharging
                    }
                }
            }
            Err(e) => {
                // 没有重试记录的充值中订单会被主动查单扫描到
                error!(error = %e, cause = %err, "创建重试记录失败");
                OrderStatus::Recharging
            }
        }
    }

    /// 重试用尽等场景下把订单终结为失败
    #[instrument(skip(self, remark), fields(order_id = order_id))]
    pub async fn fail_order(&self, order_id: i64, remark: &str) -> Result<Order> {
        let mut order = self.state.reload(order_id).await?;
        if order.status == OrderStatus::PendingRecharge {
            order = self
                .state
                .transition(&order, OrderStatus::Recharging, "")
                .await?;
        }
        match order.status {
            OrderStatus::Recharging | OrderStatus::Processing => {
                let (_, order) = self
                    .apply_reported_status(order, OrderStatus::Failed, remark)
                    .await?;
                Ok(order)
            }
            _ => Ok(order),
        }
    }

    // ------------------------------------------------------------------
    // 结果落库
    // ------------------------------------------------------------------

    /// 把上游报告的状态应用到订单
    ///
    /// 版本冲突时重读订单重新判断；判断结果不是 Applied 时不做任何写入。
    async fn apply_reported_status(
        &self,
        mut order: Order,
        reported: OrderStatus,
        remark: &str,
    ) -> Result<(CallbackOutcome, Order)> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let outcome = classify_report(order.status, reported);
            if outcome != CallbackOutcome::Applied {
                return Ok((outcome, order));
            }

            match self.state.transition(&order, reported, remark).await {
                Ok(next) => {
                    self.after_transition(&next).await;
                    return Ok((CallbackOutcome::Applied, next));
                }
                Err(RechargeError::ConcurrencyConflict) => {
                    order = self.state.reload(order.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(RechargeError::ConcurrencyConflict)
    }

    /// 最终状态的副作用：失败退回余额，生成通知
    ///
    /// 状态已经落库，副作用失败不向上传播。退回失败时为订单登记一条重试记录，
    /// 由重试扫描补做退回；通知有补偿扫描。
    async fn after_transition(&self, order: &Order) {
        if order.status == OrderStatus::Failed {
            if let Err(e) = self.settlement.credit_failed_order(order).await {
                warn!(order_id = order.id, error = %e, "失败订单退回余额失败，交给重试服务补做");
                if let Err(schedule_err) = self.retry.schedule(order.id, &e).await {
                    error!(order_id = order.id, error = %schedule_err, "登记退回重试失败，需人工处理");
                }
            }
        }
        if order.status.is_final_outcome() {
            if let Err(e) = self.notifier.notify_status(order).await {
                warn!(order_id = order.id, error = %e, "生成通知失败");
            }
        }
    }

    // ------------------------------------------------------------------
    // 回调与查单
    // ------------------------------------------------------------------

    /// 处理上游回调
    ///
    /// 每个回调无论结果如何都写一条回调日志；日志写入失败时返回错误，让上游重推。
    #[instrument(skip(self, raw), fields(platform = %platform))]
    pub async fn handle_callback(&self, platform: &str, raw: &str) -> Result<CallbackHandling> {
        let parser = self.registry.parser(platform)?;

        let parsed = match parser.parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "回调验签或解析失败");
                self.log_callback(platform, "", raw, None, CallbackOutcome::Rejected, Some(e.to_string()))
                    .await?;
                return Ok(CallbackHandling {
                    outcome: CallbackOutcome::Rejected,
                    order_number: None,
                    status: None,
                    reply: parser.reply(false),
                });
            }
        };

        let Some(order) = self.find_callback_order(&parsed.order_number).await? else {
            warn!(order_number = %parsed.order_number, "回调订单不存在");
            self.log_callback(
                platform,
                &parsed.order_number,
                raw,
                Some(parsed.status),
                CallbackOutcome::Rejected,
                Some(RechargeError::OrderNotFound(parsed.order_number.clone()).to_string()),
            )
            .await?;
            return Ok(CallbackHandling {
                outcome: CallbackOutcome::Rejected,
                order_number: Some(parsed.order_number),
                status: None,
                reply: parser.reply(false),
            });
        };

        if let Some(provider_order) = parsed
            .provider_order_number
            .as_deref()
            .filter(|p| order.provider_order_number.as_deref() != Some(*p))
        {
            self.orders
                .set_provider_order_number(order.id, provider_order)
                .await?;
        }

        let current = order.status;
        let (outcome, order) = match self
            .apply_reported_status(order, parsed.status, &parsed.message)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(order_number = %parsed.order_number, error = %e, "回调落库失败");
                self.log_callback(
                    platform,
                    &parsed.order_number,
                    raw,
                    Some(parsed.status),
                    CallbackOutcome::Rejected,
                    Some(e.to_string()),
                )
                .await?;
                return Ok(CallbackHandling {
                    outcome: CallbackOutcome::Rejected,
                    order_number: Some(parsed.order_number),
                    status: Some(current),
                    reply: parser.reply(false),
                });
            }
        };

        let conflict = (outcome == CallbackOutcome::Conflict).then(|| {
            let err = RechargeError::CallbackConflict {
                order_number: order.order_number.clone(),
                current: order.status,
                reported: parsed.status,
            };
            warn!(error = %err, "回调与订单状态矛盾，待人工对账");
            err.to_string()
        });

        self.log_callback(
            platform,
            &order.order_number,
            raw,
            Some(parsed.status),
            outcome,
            conflict,
        )
        .await?;

        info!(
            order_number = %order.order_number,
            outcome = outcome.as_str(),
            status = %order.status,
            "回调处理完成"
        );

        Ok(CallbackHandling {
            outcome,
            order_number: Some(order.order_number),
            status: Some(order.status),
            reply: parser.reply(true),
        })
    }

    /// 回调订单号优先按我方订单号查，其次按合作方订单号查
    async fn find_callback_order(&self, reported_id: &str) -> Result<Option<Order>> {
        if reported_id.is_empty() {
            return Ok(None);
        }
        if let Some(order) = self.orders.get_by_order_number(reported_id).await? {
            return Ok(Some(order));
        }
        for client in [OrderClient::ExternalApi, OrderClient::Kekebang, OrderClient::Manual] {
            if let Some(order) = self.orders.get_by_out_trade_num(client, reported_id).await? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    async fn log_callback(
        &self,
        platform: &str,
        order_number: &str,
        raw: &str,
        parsed_status: Option<OrderStatus>,
        outcome: CallbackOutcome,
        error_message: Option<String>,
    ) -> Result<()> {
        metrics::record_callback(platform, outcome.as_str());
        self.callback_logs
            .insert(NewCallbackLog {
                platform_code: platform.to_string(),
                order_number: order_number.to_string(),
                raw_payload: raw.to_string(),
                parsed_status,
                outcome,
                error_message,
            })
            .await?;
        Ok(())
    }

    /// 主动向上游查单，结果按回调同样的规则落库
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn query_order_status(&self, order_id: i64) -> Result<Order> {
        let order = self.state.reload(order_id).await?;
        if !matches!(
            order.status,
            OrderStatus::Recharging | OrderStatus::Processing
        ) {
            return Ok(order);
        }

        let code = order.platform_code.clone().unwrap_or_default();
        let adapter = self.registry.adapter(&code)?;
        let Some(reported) = adapter.query_status(&order).await? else {
            debug!("上游暂无结果");
            return Ok(order);
        };

        let (outcome, order) = self
            .apply_reported_status(order, reported, "主动查单")
            .await?;
        info!(reported = %reported, outcome = outcome.as_str(), "主动查单完成");
        Ok(order)
    }

    /// 把长时间停留在待充值的订单重新放回充值队列，返回重投数量
    ///
    /// 覆盖入队失败、认领前失败且重投也失败的订单。
    pub async fn requeue_stale_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<usize> {
        let stale = self
            .orders
            .list_stale(OrderStatus::PendingRecharge, updated_before, limit)
            .await?;

        let mut requeued = 0;
        for order in stale.iter().filter(|o| o.platform_code.is_some()) {
            self.queue
                .push_json(&self.recharge_queue, &RechargeTask::for_order(order))
                .await?;
            requeued += 1;
        }
        if requeued > 0 {
            info!(requeued, "待充值订单已重新入队");
        }
        Ok(requeued)
    }

    /// 对长时间停留在充值中的订单主动查单，返回状态发生变化的订单数
    ///
    /// 有未关闭重试记录的订单归重试服务处理，这里跳过。
    pub async fn poll_stale_orders(&self, updated_before: DateTime<Utc>, limit: i64) -> Result<usize> {
        let stale = self
            .orders
            .list_stale(OrderStatus::Recharging, updated_before, limit)
            .await?;

        let mut changed = 0;
        for order in stale {
            if self.retries.find_open(order.id).await?.is_some() {
                continue;
            }
            match self.query_order_status(order.id).await {
                Ok(updated) if updated.status != order.status => changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(order_id = order.id, error = %e, "主动查单失败");
                }
            }
        }
        Ok(changed)
    }
}
