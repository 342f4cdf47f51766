//! 响应体
//!
//! 外部 API 与运营接口使用数字码 [`ApiResponse`]，客客帮与 MF178 渠道使用字符串码 [`StringCodeResponse`]。

use serde::Serialize;

/// 数字码统一响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 200 成功，4xx 请求问题，5xx 服务问题
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
    /// 响应时间（Unix 秒）
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_code(200, "success", Some(data))
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self::with_code(200, message, Some(data))
    }

    pub fn with_code(code: u16, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::with_code(code, message, None)
    }
}

/// 字符串码渠道响应
#[derive(Debug, Serialize)]
pub struct StringCodeResponse<T> {
    /// SUCCESS / FAIL
    pub code: &'static str,
    pub message: String,
    pub data: T,
}

impl<T> StringCodeResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "SUCCESS",
            message: "success".to_string(),
            data,
        }
    }

    pub fn fail_with(message: impl Into<String>, data: T) -> Self {
        Self {
            code: "FAIL",
            message: message.into(),
            data,
        }
    }
}

impl StringCodeResponse<serde_json::Value> {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::fail_with(message, serde_json::json!({}))
    }
}
