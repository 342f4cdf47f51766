//! HTTP 接口
//!
//! - 合作方下单：外部 API（数字码）与客客帮（字符串码）两个渠道
//! - 上游回调：每个充值平台一个入口
//! - 运营退款
//!
//! 下单与回调都只做验签和归一，业务全部交给 `service` 层。

pub mod error;
pub mod handlers;
pub mod nonce;
pub mod response;
pub mod routes;
pub mod state;

pub use nonce::{MemoryNonceStore, NonceStore};
pub use response::{ApiResponse, StringCodeResponse};
pub use routes::api_routes;
pub use state::AppState;
