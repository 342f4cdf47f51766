//! 商品路由（只读）

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 商品到上游平台的路由规则
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductRoute {
    pub product_id: i64,
    pub name: String,
    /// 面值
    pub denom: Decimal,
    /// 结算价
    pub price: Decimal,
    /// 1 上架
    pub status: i16,
    pub platform_code: String,
    /// 上游商品编码
    pub provider_sku: String,
}

impl ProductRoute {
    pub fn is_on_sale(&self) -> bool {
        self.status == 1
    }
}
