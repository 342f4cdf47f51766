//! 订单实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderClient, OrderStatus};

/// 充值订单
///
/// 状态只能通过 `OrderStateMachine` 修改；每次写入都以 `version` 做乐观并发控制。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    /// 本系统订单号，同时作为提交给上游的外部单号
    pub order_number: String,
    /// 合作方订单号，同一渠道内唯一
    pub out_trade_num: String,
    /// 付款用户（合作方账号绑定的本地用户）
    pub customer_id: i64,
    pub mobile: String,
    pub product_id: i64,
    /// 面值
    pub denom: Decimal,
    /// 结算价
    pub price: Decimal,
    pub status: OrderStatus,
    pub client: OrderClient,
    /// 履约平台
    #[sqlx(default)]
    pub platform_code: Option<String>,
    /// 上游 SKU
    #[sqlx(default)]
    pub provider_sku: Option<String>,
    /// 下单来源账号
    pub platform_account_id: i64,
    /// 上游返回的订单号
    #[sqlx(default)]
    pub provider_order_number: Option<String>,
    /// 运营商：1 移动 2 电信 3 联通
    pub isp: i16,
    #[sqlx(default)]
    pub notify_url: Option<String>,
    pub remark: String,
    #[sqlx(default)]
    pub param1: Option<String>,
    #[sqlx(default)]
    pub param2: Option<String>,
    #[sqlx(default)]
    pub param3: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// 新建订单参数
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub out_trade_num: String,
    pub customer_id: i64,
    pub mobile: String,
    pub product_id: i64,
    pub denom: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub client: OrderClient,
    pub platform_code: Option<String>,
    pub provider_sku: Option<String>,
    pub platform_account_id: i64,
    pub isp: i16,
    pub notify_url: Option<String>,
    pub remark: String,
    pub param1: Option<String>,
    pub param2: Option<String>,
    pub param3: Option<String>,
}

impl NewOrder {
    /// 按新建参数构造订单实体（id 与时间戳由存储层回填）
    pub fn into_order(self, id: i64, now: DateTime<Utc>) -> Order {
        Order {
            id,
            order_number: self.order_number,
            out_trade_num: self.out_trade_num,
            customer_id: self.customer_id,
            mobile: self.mobile,
            product_id: self.product_id,
            denom: self.denom,
            price: self.price,
            status: self.status,
            client: self.client,
            platform_code: self.platform_code,
            provider_sku: self.provider_sku,
            platform_account_id: self.platform_account_id,
            provider_order_number: None,
            isp: self.isp,
            notify_url: self.notify_url,
            remark: self.remark,
            param1: self.param1,
            param2: self.param2,
            param3: self.param3,
            version: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// 生成订单号：P + 时间戳 + 6 位随机字母数字
pub fn generate_order_number() -> String {
    use rand::Rng;
    use rand::distr::Alphanumeric;

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("P{}{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[cfg(test)]
impl NewOrder {
    /// 单元测试用：50 元面值、待充值、已路由到客客帮
    pub(crate) fn test_fixture() -> Self {
        Self {
            order_number: "P20240101120000abcdef".to_string(),
            out_trade_num: "ABC123".to_string(),
            customer_id: 1,
            mobile: "13800138000".to_string(),
            product_id: 1,
            denom: Decimal::from(50),
            price: Decimal::new(4950, 2),
            status: OrderStatus::PendingRecharge,
            client: OrderClient::ExternalApi,
            platform_code: Some("kekebang".to_string()),
            provider_sku: Some("SKU50".to_string()),
            platform_account_id: 1,
            isp: 1,
            notify_url: Some("http://partner.test/notify".to_string()),
            remark: String::new(),
            param1: None,
            param2: None,
            param3: None,
        }
    }
}
