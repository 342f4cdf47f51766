//! 应用状态

use std::sync::Arc;

use recharge_shared::config::PartnerConfig;

use crate::api::nonce::NonceStore;
use crate::service::Services;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    /// 合作方请求的 nonce 防重放
    pub nonces: Arc<dyn NonceStore>,
    pub partner: PartnerConfig,
}

impl AppState {
    pub fn new(services: Services, nonces: Arc<dyn NonceStore>, partner: PartnerConfig) -> Self {
        Self {
            services,
            nonces,
            partner,
        }
    }
}
