//! 合作方账号

use serde::{Deserialize, Serialize};

/// 下游合作方账号凭证
///
/// app_key / app_secret 用于校验下单签名与签发回推通知。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlatformAccount {
    pub id: i64,
    pub platform_id: i64,
    pub platform_code: String,
    pub account_name: String,
    pub app_key: String,
    #[serde(skip_serializing)]
    pub app_secret: String,
    /// 余额归属的本地用户
    pub bind_user_id: i64,
    /// 是否主动推送结果：1 推送 0 由合作方拉取
    pub push_status: i16,
    /// 账号级回推地址，订单未带 notify_url 时使用；客客帮为其开放接口根地址
    #[sqlx(default)]
    pub notify_url: Option<String>,
    /// 1 启用 0 禁用
    pub status: i16,
}

impl PlatformAccount {
    pub fn is_active(&self) -> bool {
        self.status == 1
    }

    pub fn push_enabled(&self) -> bool {
        self.push_status == 1
    }
}
