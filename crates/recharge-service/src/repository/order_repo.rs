//! 订单仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::OrderRepositoryTrait;
use crate::error::{RechargeError, Result};
use crate::models::{NewOrder, Order, OrderClient, OrderStatus};

const ORDER_COLUMNS: &str = r#"
    id, order_number, out_trade_num, customer_id, mobile, product_id, denom, price,
    status, client, platform_code, provider_sku, platform_account_id, provider_order_number,
    isp, notify_url, remark, param1, param2, param3, version,
    created_at, updated_at, finished_at
"#;

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let out_trade_num = order.out_trade_num.clone();
        let result = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (
                order_number, out_trade_num, customer_id, mobile, product_id, denom, price,
                status, client, platform_code, provider_sku, platform_account_id,
                isp, notify_url, remark, param1, param2, param3
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(&order.order_number)
        .bind(&order.out_trade_num)
        .bind(order.customer_id)
        .bind(&order.mobile)
        .bind(order.product_id)
        .bind(order.denom)
        .bind(order.price)
        .bind(order.status)
        .bind(order.client)
        .bind(&order.platform_code)
        .bind(&order.provider_sku)
        .bind(order.platform_account_id)
        .bind(order.isp)
        .bind(&order.notify_url)
        .bind(&order.remark)
        .bind(&order.param1)
        .bind(&order.param2)
        .bind(&order.param3)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(order) => Ok(order),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RechargeError::DuplicateOrder(out_trade_num))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn get_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn get_by_out_trade_num(
        &self,
        client: OrderClient,
        out_trade_num: &str,
    ) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE client = $1 AND out_trade_num = $2"
        ))
        .bind(client)
        .bind(out_trade_num)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn update_status(
        &self,
        id: i64,
        expected_version: i32,
        status: OrderStatus,
        remark: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                remark = COALESCE(NULLIF($4, ''), remark),
                version = version + 1,
                updated_at = NOW(),
                finished_at = CASE WHEN $5 THEN NOW() ELSE finished_at END
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(status)
        .bind(remark)
        .bind(status.is_final_outcome())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_route(
        &self,
        id: i64,
        expected_version: i32,
        platform_code: &str,
        provider_sku: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET platform_code = $3, provider_sku = $4, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(platform_code)
        .bind(provider_sku)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_provider_order_number(&self, id: i64, provider_order_number: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET provider_order_number = $2 WHERE id = $1")
            .bind(id)
            .bind(provider_order_number)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_stale(
        &self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(status)
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }
}
