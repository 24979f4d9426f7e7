//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 默认行为：取最后一条 User 消息，回显为一段文本加一个 echo 工具调用标记，按 6 字符切块模拟打字。
//! scripted 模式按给定块原样输出，可注入「建流失败 N 次」与「第 N 块后流中断」。

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// 默认回显模式下每块字符数
const CHUNK_CHARS: usize = 6;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Option<Vec<String>>,
    /// 输出 fail_after 块后以 Stream 错误结束
    fail_after: Option<(usize, String)>,
    open_failures: AtomicU32,
    open_error: Option<LlmError>,
    chunk_delay: Option<Duration>,
    stream_requests: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按给定块原样输出
    pub fn scripted<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Some(chunks.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 输出 n 块之后以流错误结束
    pub fn with_stream_error_after(mut self, n: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((n, message.into()));
        self
    }

    /// 前 times 次建流直接返回 error
    pub fn with_open_failures(mut self, times: u32, error: LlmError) -> Self {
        self.open_failures = AtomicU32::new(times);
        self.open_error = Some(error);
        self
    }

    /// 每块之间等待 delay（测试取消 / 并发）
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// complete_stream 被调用的次数（含失败的）
    pub fn stream_requests(&self) -> usize {
        self.stream_requests.load(Ordering::SeqCst)
    }

    fn chunks_for(&self, messages: &[Message]) -> Vec<String> {
        if let Some(script) = &self.script {
            return script.clone();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let args = serde_json::json!({ "text": last_user });
        let reply = format!("Echoing your message. <call name=echo args={args}/> Done.");
        let chars: Vec<char> = reply.chars().collect();
        chars
            .chunks(CHUNK_CHARS)
            .map(|c| c.iter().collect())
            .collect()
    }

    fn take_open_failure(&self) -> Option<LlmError> {
        let error = self.open_error.as_ref()?;
        self.open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| error.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(err) = self.take_open_failure() {
            return Err(err);
        }
        Ok(self.chunks_for(messages).concat())
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        self.stream_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_open_failure() {
            return Err(err);
        }
        let mut items: Vec<Result<String, LlmError>> =
            self.chunks_for(messages).into_iter().map(Ok).collect();
        if let Some((n, message)) = &self.fail_after {
            items.truncate(*n);
            items.push(Err(LlmError::Stream(message.clone())));
        }
        let delay = self.chunk_delay;
        let tokens = stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        });
        Ok(Box::pin(tokens))
    }
}
