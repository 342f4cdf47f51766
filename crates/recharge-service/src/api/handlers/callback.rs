//! 上游回调入口
//!
//! 原始报文直接交给对应平台的解析器，验签失败或处理失败时返回让平台重推的应答。

use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{error, info, instrument};

use crate::api::state::AppState;
use crate::error::RechargeError;
use crate::platform::CallbackReply;

fn reply_response(reply: CallbackReply) -> Response {
    if reply.json {
        ([(header::CONTENT_TYPE, "application/json")], reply.body).into_response()
    } else {
        ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], reply.body).into_response()
    }
}

/// POST /api/v1/callback/{platform}
#[instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn receive(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    body: String,
) -> Response {
    match state.services.dispatch.handle_callback(&platform, &body).await {
        Ok(handling) => {
            info!(
                outcome = handling.outcome.as_str(),
                order_number = handling.order_number.as_deref().unwrap_or(""),
                "回调处理完成"
            );
            reply_response(handling.reply)
        }
        Err(RechargeError::PlatformNotFound(code)) => {
            (StatusCode::NOT_FOUND, format!("unknown platform: {code}")).into_response()
        }
        Err(e) => {
            // 回调日志都没写进去，让平台稍后重推
            error!(error = %e, "回调处理失败");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_content_type() {
        let response = reply_response(CallbackReply::json(r#"{"code":"00000"}"#));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let response = reply_response(CallbackReply::text("success"));
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }
}
