//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式文本增量）。
//! RetryingLlmClient 用退避重试包装「建立流」这一步；流已开始后的读取失败不重试，由编排器收尾。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::core::retry::{retry, RetryPolicy};
use crate::memory::Message;

/// 模型输出的文本增量流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error: {0}")]
    ApiError(String),

    /// 流在中途异常结束
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout")]
    Timeout,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::RateLimited { .. } | LlmError::Timeout
        )
    }
}

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回文本增量流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError>;
}

/// 带重试的客户端：complete 与建立流时按 policy 退避重试；可选单次尝试超时（超时按 Timeout 计，可重试）
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy<LlmError>,
    attempt_timeout: Option<Duration>,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy<LlmError>) -> Self {
        Self {
            inner,
            policy,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    async fn bounded<T>(&self, attempt: impl Future<Output = Result<T, LlmError>>) -> Result<T, LlmError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(LlmError::Timeout)),
            None => attempt.await,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        retry(&self.policy, || self.bounded(self.inner.complete(messages))).await
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        retry(&self.policy, || self.bounded(self.inner.complete_stream(messages))).await
    }
}
