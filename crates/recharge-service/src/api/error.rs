//! 错误到 HTTP 响应的映射

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::api::response::ApiResponse;
use crate::error::{ErrorKind, RechargeError};

impl RechargeError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::OrderNotFound(_)
            | Self::ProductNotFound(_)
            | Self::AccountNotFound(_)
            | Self::PlatformNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateOrder(_) | Self::AlreadyRefunded(_) => StatusCode::CONFLICT,
            Self::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Auth => StatusCode::UNAUTHORIZED,
                ErrorKind::TransientProvider => StatusCode::BAD_GATEWAY,
                ErrorKind::BusinessRejection => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Persistence | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// 对外展示的错误信息；系统错误只返回通用提示，详细信息仅记录日志
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Persistence | ErrorKind::Internal => {
                tracing::error!(error = %self, code = self.error_code(), "系统错误");
                "服务内部错误，请稍后重试".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for RechargeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiResponse::error(status.as_u16(), self.public_message());
        (status, Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for RechargeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            RechargeError::Auth("签名错误".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RechargeError::OrderNotFound("P1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RechargeError::InvalidTransition {
                order_id: 1,
                from: OrderStatus::Recharging,
                to: OrderStatus::Refunded,
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RechargeError::LockTimeout {
                resource: "refund:order:1".into()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RechargeError::Database(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_system_error_message_hidden() {
        let err = RechargeError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.public_message(), "服务内部错误，请稍后重试");

        let err = RechargeError::Validation("mobile 格式错误".into());
        assert!(err.public_message().contains("mobile"));
    }
}
