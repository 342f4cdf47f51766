//! 充值服务错误类型
//!
//! 定义服务层的业务错误和系统错误，并按处理方式归入 [`ErrorKind`]。

use thiserror::Error;

use crate::models::OrderStatus;

/// 错误分类
///
/// 决定错误在派单链路中的处理方式：是否重试、订单是否终结、是否需要人工介入。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 输入格式错误，直接拒绝
    Validation,
    /// 签名或时间戳校验失败，直接拒绝
    Auth,
    /// 网络、超时或上游 5xx，进入重试
    TransientProvider,
    /// 上游明确拒单，订单终结为失败
    BusinessRejection,
    /// 回调与本地终态矛盾，仅记录供人工对账
    Conflict,
    /// 退款锁获取失败，稍后再试
    LockTimeout,
    /// 持久化失败，事务已回滚
    Persistence,
    /// 其他内部错误
    Internal,
}

/// 充值服务错误类型
#[derive(Debug, Error)]
pub enum RechargeError {
    // === 请求校验 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("鉴权失败: {0}")]
    Auth(String),

    // === 订单相关 ===
    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    #[error("订单已存在: out_trade_num={0}")]
    DuplicateOrder(String),

    #[error("订单状态不允许此操作: order_id={order_id}, {from} -> {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("订单已退款: order_id={0}")]
    AlreadyRefunded(i64),

    #[error("商品不存在或已下架: product_id={0}")]
    ProductNotFound(i64),

    #[error("合作方账号不存在: {0}")]
    AccountNotFound(String),

    #[error("余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: String, available: String },

    // === 上游平台 ===
    #[error("充值平台不存在: {0}")]
    PlatformNotFound(String),

    #[error("上游平台暂时不可用: {platform} - {message}")]
    TransientProvider { platform: String, message: String },

    #[error("上游平台拒绝: {platform} - {message}")]
    BusinessRejection { platform: String, message: String },

    #[error("回调与订单终态冲突: order={order_number}, 当前={current}, 回调={reported}")]
    CallbackConflict {
        order_number: String,
        current: OrderStatus,
        reported: OrderStatus,
    },

    // === 并发控制 ===
    #[error("获取锁超时: {resource}")]
    LockTimeout { resource: String },

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("重试租约已失效: order_id={order_id}")]
    RetryLeaseLost { order_id: i64 },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("队列错误: {0}")]
    Queue(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 充值服务 Result 类型别名
pub type Result<T> = std::result::Result<T, RechargeError>;

impl From<recharge_shared::error::SharedError> for RechargeError {
    fn from(err: recharge_shared::error::SharedError) -> Self {
        use recharge_shared::error::SharedError;
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::Redis(e) => Self::Redis(e.to_string()),
            SharedError::Queue(msg) => Self::Queue(msg),
            SharedError::Codec(e) => Self::Serialization(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for RechargeError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

/// 未标注平台的 HTTP 错误一律按瞬时错误处理；平台客户端会自行补充平台编码
impl From<reqwest::Error> for RechargeError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientProvider {
            platform: err
                .url()
                .and_then(|u| u.host_str())
                .unwrap_or("http")
                .to_string(),
            message: err.to_string(),
        }
    }
}

impl RechargeError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::OrderNotFound(_)
            | Self::DuplicateOrder(_)
            | Self::InvalidTransition { .. }
            | Self::AlreadyRefunded(_)
            | Self::ProductNotFound(_)
            | Self::AccountNotFound(_) => ErrorKind::Validation,
            Self::Auth(_) => ErrorKind::Auth,
            Self::TransientProvider { .. } => ErrorKind::TransientProvider,
            Self::BusinessRejection { .. }
            | Self::InsufficientBalance { .. }
            | Self::PlatformNotFound(_) => ErrorKind::BusinessRejection,
            Self::CallbackConflict { .. }
            | Self::ConcurrencyConflict
            | Self::RetryLeaseLost { .. } => ErrorKind::Conflict,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::Database(_) | Self::Redis(_) | Self::Queue(_) => ErrorKind::Persistence,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider { .. }
                | Self::Database(_)
                | Self::Redis(_)
                | Self::Queue(_)
                | Self::LockTimeout { .. }
                | Self::ConcurrencyConflict
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Redis(_)
                | Self::Queue(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
                | Self::RetryLeaseLost { .. }
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::DuplicateOrder(_) => "DUPLICATE_ORDER",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyRefunded(_) => "ALREADY_REFUNDED",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::PlatformNotFound(_) => "PLATFORM_NOT_FOUND",
            Self::TransientProvider { .. } => "PROVIDER_UNAVAILABLE",
            Self::BusinessRejection { .. } => "PROVIDER_REJECTED",
            Self::CallbackConflict { .. } => "CALLBACK_CONFLICT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::RetryLeaseLost { .. } => "RETRY_LEASE_LOST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(
            RechargeError::TransientProvider {
                platform: "kekebang".to_string(),
                message: "timeout".to_string()
            }
            .is_retryable()
        );
        assert!(RechargeError::Redis("connection failed".to_string()).is_retryable());
        assert!(
            !RechargeError::BusinessRejection {
                platform: "kekebang".to_string(),
                message: "号码错误".to_string()
            }
            .is_retryable()
        );
        assert!(!RechargeError::Auth("签名错误".to_string()).is_retryable());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            RechargeError::LockTimeout {
                resource: "refund:order:1".to_string()
            }
            .kind(),
            ErrorKind::LockTimeout
        );
        assert_eq!(
            RechargeError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            RechargeError::CallbackConflict {
                order_number: "P1".to_string(),
                current: OrderStatus::Success,
                reported: OrderStatus::Failed,
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(RechargeError::OrderNotFound("1".to_string()).is_business_error());
        assert!(!RechargeError::Internal("panic".to_string()).is_business_error());
        assert!(!RechargeError::ConcurrencyConflict.is_business_error());
    }

    #[test]
    fn test_error_display() {
        let err = RechargeError::InvalidTransition {
            order_id: 9,
            from: OrderStatus::Success,
            to: OrderStatus::Recharging,
        };
        let msg = err.to_string();
        assert!(msg.contains("order_id=9"));
        assert!(msg.contains("success"));
        assert!(msg.contains("recharging"));
    }
}
