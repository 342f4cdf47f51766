//! 上游 HTTP 客户端
//!
//! 统一超时、链路追踪头注入与错误分类：网络错误、超时、429 与 5xx 为瞬时错误，
//! 其余非 2xx 视为上游拒绝。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use recharge_shared::observability::tracing::inject_to_headers;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RechargeError, Result};
use crate::signature::SignParams;

#[derive(Clone)]
pub struct ProviderHttp {
    client: Client,
    platform: String,
}

impl ProviderHttp {
    pub fn new(platform: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RechargeError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            platform: platform.to_string(),
        })
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<String> {
        self.send(url, self.client.post(url).json(body)).await
    }

    /// 附带鉴权头的 JSON 请求
    pub async fn post_json_with_header<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        name: &str,
        value: &str,
    ) -> Result<String> {
        self.send(url, self.client.post(url).header(name, value).json(body))
            .await
    }

    pub async fn post_form(&self, url: &str, form: &SignParams) -> Result<String> {
        self.send(url, self.client.post(url).form(form)).await
    }

    pub fn transient(&self, message: impl Into<String>) -> RechargeError {
        RechargeError::TransientProvider {
            platform: self.platform.clone(),
            message: message.into(),
        }
    }

    pub fn rejection(&self, message: impl Into<String>) -> RechargeError {
        RechargeError::BusinessRejection {
            platform: self.platform.clone(),
            message: message.into(),
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<String> {
        let mut trace_headers = HashMap::new();
        inject_to_headers(&mut trace_headers);
        let request = trace_headers
            .iter()
            .fold(request, |req, (k, v)| req.header(k.as_str(), v.as_str()));

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            warn!(platform = %self.platform, url, error = %e, "上游请求失败");
            self.transient(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transient(format!("读取响应失败: {e}")))?;

        debug!(
            platform = %self.platform,
            url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            body = %body,
            "上游响应"
        );

        classify_status(status).map_err(|transient| {
            let message = format!("HTTP {status}: {body}");
            if transient {
                self.transient(message)
            } else {
                self.rejection(message)
            }
        })?;

        Ok(body)
    }
}

/// 非 2xx 时返回 Err(是否瞬时错误)
fn classify_status(status: StatusCode) -> std::result::Result<(), bool> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS)
    }
}
