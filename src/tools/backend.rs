//! 工具后端 HTTP 客户端
//!
//! 统一超时、可选 Bearer Key 与错误归类：连接失败 / 超时 / 5xx → Transient，429 → RateLimited，
//! 其余 4xx → Rejected。重试与否交给执行器的重试策略。

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;

/// 错误体最多保留的字符数
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wayfarer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Rejected(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ToolError> {
        let request = self.client.post(self.url(path)).json(body);
        self.send(request).await
    }

    pub async fn get_json<Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> Result<Value, ToolError> {
        let request = self.client.get(self.url(path)).query(query);
        self.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ToolError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| ToolError::Transient(format!("invalid response body: {e}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ToolError {
    if err.is_builder() {
        ToolError::Rejected(err.to_string())
    } else {
        ToolError::Transient(err.to_string())
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ToolError {
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        ToolError::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ToolError::Transient(format!("{status}: {preview}"))
    } else {
        ToolError::Rejected(format!("{status}: {preview}"))
    }
}
