//! 合作方账号仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PlatformAccountRepositoryTrait;
use crate::error::Result;
use crate::models::PlatformAccount;

const ACCOUNT_COLUMNS: &str = r#"
    id, platform_id, platform_code, account_name, app_key, app_secret,
    bind_user_id, push_status, notify_url, status
"#;

pub struct PlatformAccountRepository {
    pool: PgPool,
}

impl PlatformAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlatformAccountRepositoryTrait for PlatformAccountRepository {
    async fn get(&self, id: i64) -> Result<Option<PlatformAccount>> {
        let account = sqlx::query_as::<_, PlatformAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_by_app_key(&self, app_key: &str) -> Result<Option<PlatformAccount>> {
        let account = sqlx::query_as::<_, PlatformAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE app_key = $1"
        ))
        .bind(app_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_by_account_name(
        &self,
        platform_code: &str,
        account_name: &str,
    ) -> Result<Option<PlatformAccount>> {
        let account = sqlx::query_as::<_, PlatformAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE platform_code = $1 AND account_name = $2"
        ))
        .bind(platform_code)
        .bind(account_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }
}
