//! 通知发送器
//!
//! `NotificationSender` 抽象一次推送，生产实现是带超时与链路追踪头的 HTTP POST。
//! 合作方回复 `code` 为 0 / 200 / SUCCESS 视为已接收，其余按拒收处理。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use recharge_shared::observability::tracing::inject_to_headers;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::templates::PushRequest;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 推送并校验合作方回复
    async fn send(&self, request: &PushRequest) -> Result<()>;
}

pub struct HttpSender {
    client: Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Template(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationSender for HttpSender {
    async fn send(&self, request: &PushRequest) -> Result<()> {
        let mut trace_headers = HashMap::new();
        inject_to_headers(&mut trace_headers);
        let builder = trace_headers.iter().fold(
            self.client.post(&request.url).json(&request.body),
            |req, (k, v)| req.header(k.as_str(), v.as_str()),
        );

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "通知请求失败");
            NotificationError::from(e)
        })?;

        let status = response.status();
        let body = response.text().await?;
        debug!(
            url = %request.url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            body = %body,
            "合作方回复"
        );

        if !status.is_success() {
            return Err(NotificationError::Transport {
                url: request.url.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        check_reply(&body)
    }
}

/// 校验合作方回复体
pub fn check_reply(raw: &str) -> Result<()> {
    let trimmed = raw.trim();
    let Ok(reply) = serde_json::from_str::<Value>(trimmed) else {
        return if trimmed.eq_ignore_ascii_case("success") || trimmed.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(NotificationError::Rejected {
                code: String::new(),
                message: trimmed.to_string(),
            })
        };
    };

    let code = match reply.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if matches!(code.as_str(), "0" | "200") || code.eq_ignore_ascii_case("success") {
        return Ok(());
    }

    let message = ["msg", "message"]
        .iter()
        .find_map(|k| reply.get(*k).and_then(Value::as_str))
        .unwrap_or(trimmed)
        .to_string();
    Err(NotificationError::Rejected { code, message })
}
