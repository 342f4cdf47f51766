//! 基础设施错误
//!
//! 数据库、Redis、队列与配置加载的错误；服务层错误通过 `From` 吸收这里的变体。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    /// 队列语义错误，例如延迟项提升脚本返回了意外结果
    #[error("队列错误: {0}")]
    Queue(String),

    #[error("队列消息编解码失败: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 连接类故障可以等一会儿再试；编解码和配置错误重试也不会好
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_) | Self::Queue(_))
    }
}
