//! 商品路由仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ProductRepositoryTrait;
use crate::error::Result;
use crate::models::ProductRoute;

pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepositoryTrait for ProductRepository {
    async fn get_route(&self, product_id: i64) -> Result<Option<ProductRoute>> {
        let route = sqlx::query_as::<_, ProductRoute>(
            r#"
            SELECT id AS product_id, name, denom, price, status, platform_code, provider_sku
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(route)
    }
}
