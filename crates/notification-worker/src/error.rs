//! 通知推送错误类型
//!
//! 区分可重试的传输失败与合作方明确拒收，上层据此决定退避重推还是直接标记失败。

use recharge_service::error::RechargeError;
use recharge_shared::error::SharedError;
use thiserror::Error;

/// 合作方对已失败订单的固定回复，重推没有意义
pub const TERMINAL_REJECTION: &str = "此订单已做单失败";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知发送失败: url={url}, 原因={reason}")]
    Transport { url: String, reason: String },

    #[error("合作方拒收通知: code={code}, message={message}")]
    Rejected { code: String, message: String },

    #[error("通知模板错误: {0}")]
    Template(String),

    #[error("通知内容解析失败: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Recharge(#[from] RechargeError),

    #[error(transparent)]
    Shared(#[from] SharedError),
}

pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    /// 是否值得退避后重推
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Rejected { message, .. } => !message.contains(TERMINAL_REJECTION),
            Self::Template(_) | Self::Deserialization(_) => false,
            Self::Recharge(e) => e.is_retryable(),
            Self::Shared(e) => e.is_retryable(),
        }
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            reason: err.to_string(),
        }
    }
}
