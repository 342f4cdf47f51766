//! 集成测试公共设施
//!
//! 内存版仓储、可编排的上游平台替身与组装好的服务。
//! 仓储替身遵循与 PostgreSQL 实现相同的约束：版本 CAS、out_trade_num 唯一、
//! 按订单净额判断扣款/退款幂等、通知 (order_id, notification_type) 去重。

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recharge_service::error::{RechargeError, Result};
use recharge_service::lock::{LocalLock, LockConfig, LockManager};
use recharge_service::models::{
    BalanceLog, BalanceStyle, CallbackLog, CallbackOutcome, NewBalanceLog, NewCallbackLog,
    NewNotification, NewOrder, NotificationRecord, NotificationStatus, Order, OrderClient,
    OrderStatus, PlatformAccount, ProductRoute, RetryRecord, RetryStatus, UserBalance,
};
use recharge_service::platform::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    PlatformRegistry, SubmitOutcome,
};
use recharge_service::repository::{
    BalanceRepositoryTrait, CallbackLogRepositoryTrait, NotificationRepositoryTrait,
    OrderRepositoryTrait, PlatformAccountRepositoryTrait, ProductRepositoryTrait,
    RetryRepositoryTrait,
};
use recharge_service::service::{
    CreateOrderCommand, CreatedOrder, RechargeTask, Repositories, Services,
};
use recharge_service::worker::{RechargeWorker, RetryWorker};
use recharge_shared::config::AppConfig;
use recharge_shared::queue::{MemoryQueue, Queue, QueueExt};
use rust_decimal::Decimal;
use serde_json::Value;

pub const FAKE_PLATFORM: &str = "fake";
pub const CUSTOMER_ID: i64 = 100;
pub const PRODUCT_ID: i64 = 1;
pub const EXTERNAL_ACCOUNT_ID: i64 = 7;
pub const EXTERNAL_APP_KEY: &str = "app-ext";
pub const EXTERNAL_SECRET: &str = "secret-ext";
pub const KEKEBANG_ACCOUNT_ID: i64 = 8;
pub const KEKEBANG_ACCOUNT_NAME: &str = "kk-shop";
pub const KEKEBANG_APP_KEY: &str = "app-kk";
pub const KEKEBANG_SECRET: &str = "secret-kk";
pub const MF178_ACCOUNT_ID: i64 = 9;
pub const MF178_ACCOUNT_NAME: &str = "mf-shop";
pub const MF178_APP_KEY: &str = "app-mf";
pub const MF178_SECRET: &str = "secret-mf";

pub fn dec(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

// ==================== 订单 ====================

#[derive(Default)]
pub struct FakeOrderRepository {
    orders: Mutex<HashMap<i64, Order>>,
    next_id: AtomicI64,
}

impl FakeOrderRepository {
    pub fn snapshot(&self, id: i64) -> Order {
        self.orders.lock().unwrap()[&id].clone()
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// 把订单的 updated_at 拨回过去，模拟长时间无回调
    pub fn age(&self, id: i64, by: chrono::Duration) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&id) {
            order.updated_at -= by;
        }
    }
}

#[async_trait]
impl OrderRepositoryTrait for FakeOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut orders = self.orders.lock().unwrap();
        if orders
            .values()
            .any(|o| o.client == order.client && o.out_trade_num == order.out_trade_num)
        {
            return Err(RechargeError::DuplicateOrder(order.out_trade_num));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order = order.into_order(id, Utc::now());
        orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn get_by_out_trade_num(
        &self,
        client: OrderClient,
        out_trade_num: &str,
    ) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.client == client && o.out_trade_num == out_trade_num)
            .cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        expected_version: i32,
        status: OrderStatus,
        remark: &str,
    ) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&id).filter(|o| o.version == expected_version) else {
            return Ok(false);
        };
        let now = Utc::now();
        order.status = status;
        if !remark.is_empty() {
            order.remark = remark.to_string();
        }
        order.version += 1;
        order.updated_at = now;
        if status.is_final_outcome() {
            order.finished_at = Some(now);
        }
        Ok(true)
    }

    async fn set_route(
        &self,
        id: i64,
        expected_version: i32,
        platform_code: &str,
        provider_sku: &str,
    ) -> Result<bool> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&id).filter(|o| o.version == expected_version) else {
            return Ok(false);
        };
        order.platform_code = Some(platform_code.to_string());
        order.provider_sku = Some(provider_sku.to_string());
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_provider_order_number(&self, id: i64, provider_order_number: &str) -> Result<()> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&id) {
            order.provider_order_number = Some(provider_order_number.to_string());
        }
        Ok(())
    }

    async fn list_stale(
        &self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>> {
        let mut stale: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.status == status && o.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }
}

// ==================== 重试记录 ====================

#[derive(Default)]
pub struct FakeRetryRepository {
    records: Mutex<Vec<RetryRecord>>,
}

impl FakeRetryRepository {
    pub fn for_order(&self, order_id: i64) -> Vec<RetryRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RetryRepositoryTrait for FakeRetryRepository {
    async fn create(
        &self,
        order_id: i64,
        max_retries: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<RetryRecord> {
        let mut records = self.records.lock().unwrap();
        if let Some(open) = records
            .iter()
            .find(|r| r.order_id == order_id && r.status == RetryStatus::Pending)
        {
            return Ok(open.clone());
        }
        let now = Utc::now();
        let record = RetryRecord {
            id: records.len() as i64 + 1,
            order_id,
            attempt_count: 1,
            max_retries,
            next_retry_at,
            last_error: last_error.to_string(),
            status: RetryStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn find_open(&self, order_id: i64) -> Result<Option<RetryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.order_id == order_id && r.status == RetryStatus::Pending)
            .cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<RetryRecord>> {
        let mut records = self.records.lock().unwrap();
        let mut claimed = Vec::new();
        for record in records
            .iter_mut()
            .filter(|r| r.status == RetryStatus::Pending && r.next_retry_at <= now)
            .take(limit as usize)
        {
            record.next_retry_at = now + chrono::Duration::seconds(lease_secs);
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn hold_lease(
        &self,
        id: i64,
        leased_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| {
            r.id == id
                && r.status == RetryStatus::Pending
                && r.next_retry_at == leased_until
                && leased_until > now
        }) {
            Some(record) => {
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: i64,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        if let Some(record) = self
            .records
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.id == id && r.status == RetryStatus::Pending)
        {
            record.attempt_count = attempt_count;
            record.next_retry_at = next_retry_at;
            record.last_error = last_error.to_string();
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn close(&self, id: i64, status: RetryStatus, last_error: &str) -> Result<()> {
        if let Some(record) = self
            .records
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.id == id && r.status == RetryStatus::Pending)
        {
            record.status = status;
            if !last_error.is_empty() {
                record.last_error = last_error.to_string();
            }
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ==================== 回调日志 ====================

#[derive(Default)]
pub struct FakeCallbackLogRepository {
    logs: Mutex<Vec<CallbackLog>>,
}

impl FakeCallbackLogRepository {
    pub fn all(&self) -> Vec<CallbackLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackLogRepositoryTrait for FakeCallbackLogRepository {
    async fn insert(&self, log: NewCallbackLog) -> Result<i64> {
        let mut logs = self.logs.lock().unwrap();
        let id = logs.len() as i64 + 1;
        logs.push(CallbackLog {
            id,
            platform_code: log.platform_code,
            order_number: log.order_number,
            raw_payload: log.raw_payload,
            parsed_status: log.parsed_status,
            outcome: log.outcome,
            error_message: log.error_message,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_by_outcome(
        &self,
        outcome: CallbackOutcome,
        limit: i64,
    ) -> Result<Vec<CallbackLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.outcome == outcome)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ==================== 余额 ====================

#[derive(Default)]
struct BalanceState {
    users: HashMap<i64, UserBalance>,
    logs: Vec<BalanceLog>,
}

#[derive(Default)]
pub struct FakeBalanceRepository {
    state: Mutex<BalanceState>,
    failing_refunds: AtomicUsize,
}

impl FakeBalanceRepository {
    pub fn with_user(user_id: i64, balance: Decimal) -> Self {
        let repo = Self::default();
        repo.state.lock().unwrap().users.insert(
            user_id,
            UserBalance {
                id: user_id,
                balance,
                credit: Decimal::ZERO,
            },
        );
        repo
    }

    /// 接下来 n 次退回写入返回数据库错误
    pub fn fail_next_refunds(&self, n: usize) {
        self.failing_refunds.store(n, Ordering::SeqCst);
    }

    pub fn balance(&self, user_id: i64) -> Decimal {
        self.state.lock().unwrap().users[&user_id].balance
    }

    pub fn logs_for(&self, order_id: i64) -> Vec<BalanceLog> {
        self.state
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BalanceRepositoryTrait for FakeBalanceRepository {
    async fn get_balance(&self, user_id: i64) -> Result<Option<UserBalance>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn apply(&self, entry: NewBalanceLog) -> Result<Option<BalanceLog>> {
        if entry.style == BalanceStyle::Refund
            && self
                .failing_refunds
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(RechargeError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get(&entry.user_id)
            .cloned()
            .ok_or_else(|| RechargeError::AccountNotFound(entry.user_id.to_string()))?;
        let net: Decimal = state
            .logs
            .iter()
            .filter(|l| l.order_id == entry.order_id)
            .map(|l| l.amount)
            .sum();

        match entry.style {
            BalanceStyle::OrderDeduct => {
                if net < Decimal::ZERO {
                    return Ok(None);
                }
                if user.available() < entry.amount.abs() {
                    return Err(RechargeError::InsufficientBalance {
                        required: entry.amount.abs().to_string(),
                        available: user.available().to_string(),
                    });
                }
            }
            BalanceStyle::Refund => {
                if net >= Decimal::ZERO {
                    return Ok(None);
                }
            }
            BalanceStyle::Manual | BalanceStyle::Recharge => {}
        }

        let delta = entry.signed_amount();
        let after = user.balance + delta;
        let log = BalanceLog {
            id: state.logs.len() as i64 + 1,
            user_id: entry.user_id,
            order_id: entry.order_id,
            platform_account_id: entry.platform_account_id,
            amount: delta,
            balance_type: entry.balance_type(),
            style: entry.style,
            balance_before: user.balance,
            balance: after,
            remark: entry.remark,
            operator: entry.operator,
            created_at: Utc::now(),
        };
        state.logs.push(log.clone());
        if let Some(user) = state.users.get_mut(&entry.user_id) {
            user.balance = after;
        }
        Ok(Some(log))
    }

    async fn list_by_order(&self, order_id: i64) -> Result<Vec<BalanceLog>> {
        Ok(self.logs_for(order_id))
    }
}

// ==================== 通知 ====================

#[derive(Default)]
pub struct FakeNotificationRepository {
    records: Mutex<Vec<NotificationRecord>>,
}

impl FakeNotificationRepository {
    pub fn for_order(&self, order_id: i64) -> Vec<NotificationRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationRepositoryTrait for FakeNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Option<NotificationRecord>> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| {
            r.order_id == notification.order_id
                && r.notification_type == notification.notification_type
        }) {
            return Ok(None);
        }
        let now = Utc::now();
        let record = NotificationRecord {
            id: records.len() as i64 + 1,
            order_id: notification.order_id,
            platform_code: notification.platform_code,
            notification_type: notification.notification_type,
            content: notification.content,
            status: NotificationStatus::Pending,
            retry_count: 0,
            next_retry_time: now,
            success_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(Some(record))
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn claim(&self, id: i64) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == NotificationStatus::Pending)
        {
            Some(record) => {
                record.status = NotificationStatus::Processing;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_success(&self, id: i64) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            record.status = NotificationStatus::Success;
            record.success_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_time: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            record.status = NotificationStatus::Pending;
            record.retry_count = retry_count;
            record.next_retry_time = next_retry_time;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            record.status = NotificationStatus::Failed;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn list_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == NotificationStatus::Pending && r.next_retry_time <= now)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn reset_stale_processing(&self, updated_before: DateTime<Utc>) -> Result<u64> {
        let mut reset = 0;
        for record in self.records.lock().unwrap().iter_mut() {
            if record.status == NotificationStatus::Processing && record.updated_at < updated_before {
                record.status = NotificationStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

// ==================== 账号与商品 ====================

pub struct FakeAccountRepository {
    accounts: Vec<PlatformAccount>,
}

impl FakeAccountRepository {
    pub fn seeded() -> Self {
        let account = |id, platform_code: &str, name: &str, key: &str, secret: &str| {
            PlatformAccount {
                id,
                platform_id: 1,
                platform_code: platform_code.to_string(),
                account_name: name.to_string(),
                app_key: key.to_string(),
                app_secret: secret.to_string(),
                bind_user_id: CUSTOMER_ID,
                push_status: 1,
                notify_url: None,
                status: 1,
            }
        };
        Self {
            accounts: vec![
                account(
                    EXTERNAL_ACCOUNT_ID,
                    "external_api",
                    "ext-shop",
                    EXTERNAL_APP_KEY,
                    EXTERNAL_SECRET,
                ),
                account(
                    KEKEBANG_ACCOUNT_ID,
                    "kekebang",
                    KEKEBANG_ACCOUNT_NAME,
                    KEKEBANG_APP_KEY,
                    KEKEBANG_SECRET,
                ),
                account(
                    MF178_ACCOUNT_ID,
                    "mf178",
                    MF178_ACCOUNT_NAME,
                    MF178_APP_KEY,
                    MF178_SECRET,
                ),
            ],
        }
    }

    pub fn external(&self) -> PlatformAccount {
        self.accounts[0].clone()
    }
}

#[async_trait]
impl PlatformAccountRepositoryTrait for FakeAccountRepository {
    async fn get(&self, id: i64) -> Result<Option<PlatformAccount>> {
        Ok(self.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn get_by_app_key(&self, app_key: &str) -> Result<Option<PlatformAccount>> {
        Ok(self.accounts.iter().find(|a| a.app_key == app_key).cloned())
    }

    async fn get_by_account_name(
        &self,
        platform_code: &str,
        account_name: &str,
    ) -> Result<Option<PlatformAccount>> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.platform_code == platform_code && a.account_name == account_name)
            .cloned())
    }
}

pub struct FakeProductRepository {
    routes: HashMap<i64, ProductRoute>,
}

impl FakeProductRepository {
    pub fn seeded() -> Self {
        let route = ProductRoute {
            product_id: PRODUCT_ID,
            name: "移动50元".to_string(),
            denom: dec("50"),
            price: dec("49.50"),
            status: 1,
            platform_code: FAKE_PLATFORM.to_string(),
            provider_sku: "M50".to_string(),
        };
        Self {
            routes: HashMap::from([(PRODUCT_ID, route)]),
        }
    }
}

#[async_trait]
impl ProductRepositoryTrait for FakeProductRepository {
    async fn get_route(&self, product_id: i64) -> Result<Option<ProductRoute>> {
        Ok(self.routes.get(&product_id).cloned())
    }
}

// ==================== 上游平台替身 ====================

/// 一次下单调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Accept,
    Succeed,
    Fail,
    Transient,
    Reject,
}

pub struct FakePlatform {
    mode: DispatchMode,
    script: Mutex<VecDeque<Submit>>,
    fallback: Mutex<Submit>,
    query_result: Mutex<Option<OrderStatus>>,
    submits: AtomicUsize,
}

impl FakePlatform {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Submit::Accept),
            query_result: Mutex::new(None),
            submits: AtomicUsize::new(0),
        }
    }

    /// 依次返回的结果，用完后回到 `always` 设定的结果
    pub fn script(&self, steps: &[Submit]) {
        self.script.lock().unwrap().extend(steps.iter().copied());
    }

    pub fn always(&self, step: Submit) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn answer_query(&self, status: Option<OrderStatus>) {
        *self.query_result.lock().unwrap() = status;
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for FakePlatform {
    fn code(&self) -> &str {
        FAKE_PLATFORM
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    async fn submit(&self, order: &Order) -> Result<SubmitOutcome> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.fallback.lock().unwrap());
        let provider_order = Some(format!("UP-{}-{n}", order.id));
        match step {
            Submit::Accept => Ok(SubmitOutcome::accepted(provider_order)),
            Submit::Succeed => Ok(SubmitOutcome::succeeded(provider_order)),
            Submit::Fail => Ok(SubmitOutcome::failed("号码不支持")),
            Submit::Transient => Err(RechargeError::TransientProvider {
                platform: FAKE_PLATFORM.to_string(),
                message: "connection reset".to_string(),
            }),
            Submit::Reject => Err(RechargeError::BusinessRejection {
                platform: FAKE_PLATFORM.to_string(),
                message: "账户已停用".to_string(),
            }),
        }
    }

    async fn query_status(&self, _order: &Order) -> Result<Option<OrderStatus>> {
        Ok(*self.query_result.lock().unwrap())
    }

    async fn query_balance(&self) -> Result<Decimal> {
        Ok(dec("1000"))
    }
}

/// 回调报文：`{"order_number": "...", "status": 4, "sign": "ok"}`，sign 不是 ok 时验签失败
impl CallbackParser for FakePlatform {
    fn platform_code(&self) -> &str {
        FAKE_PLATFORM
    }

    fn parse(&self, raw: &str) -> Result<NormalizedCallback> {
        let body: Value =
            serde_json::from_str(raw).map_err(|e| RechargeError::Validation(e.to_string()))?;
        if body["sign"] != "ok" {
            return Err(RechargeError::Auth("回调签名错误".to_string()));
        }
        let code = body["status"]
            .as_i64()
            .ok_or_else(|| RechargeError::Validation("缺少 status".to_string()))?;
        let status = OrderStatus::try_from(code as i16)
            .map_err(|_| RechargeError::Validation(format!("未知状态: {code}")))?;
        Ok(NormalizedCallback {
            order_number: body["order_number"].as_str().unwrap_or_default().to_string(),
            provider_order_number: body["provider_order"].as_str().map(str::to_string),
            status,
            amount: None,
            message: body["message"].as_str().unwrap_or_default().to_string(),
        })
    }

    fn reply(&self, accepted: bool) -> CallbackReply {
        if accepted {
            CallbackReply::text("success")
        } else {
            CallbackReply::text("fail")
        }
    }
}

pub fn callback_body(order_number: &str, status: OrderStatus) -> String {
    serde_json::json!({
        "order_number": order_number,
        "status": i16::from(status),
        "sign": "ok",
    })
    .to_string()
}

// ==================== 组装 ====================

pub struct Harness {
    pub services: Services,
    pub config: AppConfig,
    pub orders: Arc<FakeOrderRepository>,
    pub retries: Arc<FakeRetryRepository>,
    pub callback_logs: Arc<FakeCallbackLogRepository>,
    pub balances: Arc<FakeBalanceRepository>,
    pub notifications: Arc<FakeNotificationRepository>,
    pub accounts: Arc<FakeAccountRepository>,
    pub platform: Arc<FakePlatform>,
    pub queue: Arc<MemoryQueue>,
}

impl Harness {
    pub fn new(mode: DispatchMode) -> Self {
        Self::with_balance(mode, dec("1000"))
    }

    pub fn with_balance(mode: DispatchMode, balance: Decimal) -> Self {
        let config = AppConfig::default();
        let orders = Arc::new(FakeOrderRepository::default());
        let retries = Arc::new(FakeRetryRepository::default());
        let callback_logs = Arc::new(FakeCallbackLogRepository::default());
        let balances = Arc::new(FakeBalanceRepository::with_user(CUSTOMER_ID, balance));
        let notifications = Arc::new(FakeNotificationRepository::default());
        let accounts = Arc::new(FakeAccountRepository::seeded());
        let platform = Arc::new(FakePlatform::new(mode));
        let queue = Arc::new(MemoryQueue::new());

        let mut registry = PlatformRegistry::new();
        registry.register(platform.clone(), platform.clone());

        let repos = Repositories {
            orders: orders.clone(),
            products: Arc::new(FakeProductRepository::seeded()),
            accounts: accounts.clone(),
            retries: retries.clone(),
            callback_logs: callback_logs.clone(),
            balances: balances.clone(),
            notifications: notifications.clone(),
        };
        let locks = Arc::new(LockManager::new(
            Arc::new(LocalLock::new()),
            LockConfig {
                default_ttl: Duration::from_secs(5),
                retry_count: 20,
                retry_delay: Duration::from_millis(5),
            },
        ));

        let services = Services::build(repos, Arc::new(registry), queue.clone(), locks, &config);

        Self {
            services,
            config,
            orders,
            retries,
            callback_logs,
            balances,
            notifications,
            accounts,
            platform,
            queue,
        }
    }

    pub fn command(out_trade_num: &str) -> CreateOrderCommand {
        CreateOrderCommand {
            out_trade_num: out_trade_num.to_string(),
            mobile: "13800138000".to_string(),
            product_id: PRODUCT_ID,
            amount: Some(dec("50")),
            notify_url: Some("https://partner.test/notify".to_string()),
            isp: 1,
            ..Default::default()
        }
    }

    /// 通过外部 API 渠道下单
    pub async fn place(&self, out_trade_num: &str) -> CreatedOrder {
        self.services
            .orders
            .create_order(
                &self.accounts.external(),
                OrderClient::ExternalApi,
                Self::command(out_trade_num),
            )
            .await
            .unwrap()
    }

    pub fn recharge_worker(&self) -> RechargeWorker {
        RechargeWorker::new(
            self.services.dispatch.clone(),
            self.queue.clone(),
            self.config.queue.recharge_queue.clone(),
            Duration::from_millis(10),
        )
    }

    pub fn retry_worker(&self) -> RetryWorker {
        RetryWorker::new(
            self.services.dispatch.clone(),
            self.services.retry.clone(),
            &self.config.worker,
        )
    }

    /// 取出充值队列里的全部任务交给 worker 处理
    pub async fn drain_recharge_queue(&self) -> usize {
        let worker = self.recharge_worker();
        let mut handled = 0;
        while let Some(task) = self
            .queue
            .pop_json(&self.config.queue.recharge_queue, Duration::ZERO)
            .await
            .unwrap()
        {
            worker.handle(task).await;
            handled += 1;
        }
        handled
    }

    /// 队列再次投递同一订单的任务
    pub async fn redeliver(&self, order: &Order) {
        self.queue
            .push_json(&self.config.queue.recharge_queue, &RechargeTask::for_order(order))
            .await
            .unwrap();
    }

    pub async fn recharge_queue_len(&self) -> u64 {
        self.queue
            .length(&self.config.queue.recharge_queue)
            .await
            .unwrap()
    }

    pub async fn notification_queue_len(&self) -> u64 {
        self.queue
            .length(&self.config.queue.notification_queue)
            .await
            .unwrap()
    }

    pub fn order(&self, id: i64) -> Order {
        self.orders.snapshot(id)
    }
}
