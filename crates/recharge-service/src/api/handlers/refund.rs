//! 运营退款

use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::error::Result;
use crate::service::RefundResult;

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(min = 1, max = 64, message = "操作人不能为空"))]
    pub operator: String,
    #[serde(default)]
    #[validate(length(max = 500, message = "退款原因不超过500字符"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RefundData {
    pub order_id: i64,
    pub order_number: String,
    pub status: i16,
    /// 本次实际退回的金额；失败单此前已退回时为 0
    pub amount: Decimal,
    pub balance_log_id: Option<i64>,
}

impl From<RefundResult> for RefundData {
    fn from(result: RefundResult) -> Self {
        Self {
            order_id: result.order.id,
            order_number: result.order.order_number,
            status: result.order.status as i16,
            amount: result.amount,
            balance_log_id: result.log.map(|log| log.id),
        }
    }
}

/// POST /api/v1/orders/{id}/refund
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<ApiResponse<RefundData>>> {
    req.validate()?;

    let reason = if req.reason.is_empty() {
        "运营退款"
    } else {
        req.reason.as_str()
    };
    let result = state
        .services
        .settlement
        .refund_order(order_id, &req.operator, reason)
        .await?;

    info!(order_id, operator = %req.operator, amount = %result.amount, "订单已退款");
    Ok(Json(ApiResponse::success_with_message(
        RefundData::from(result),
        "退款成功",
    )))
}
