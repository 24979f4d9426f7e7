//! 错误类型
//!
//! 按层划分：ToolError（工具后端，带可重试分类）、PersistenceError（对话落库）、
//! ChatError（调用方可见的失败：配置错误、非法请求）。LLM 层错误见 `crate::llm::LlmError`。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 对外可见的错误：只有调用方自身触发的问题（配置、请求格式）才会以 Err 返回，
/// 流内的上游 / 工具 / 持久化失败都在会话内部消化为事件或日志。
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 工具调用失败；is_retryable 供重试器判断是否值得再试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// 网络抖动、连接失败、5xx
    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error("backend rate limited the request")]
    RateLimited,

    /// 4xx 等后端明确拒绝的请求，重试无意义
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Transient(_) | ToolError::RateLimited)
    }
}

/// 对话轮次落库失败（只记日志，不回传客户端）
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection lock poisoned")]
    Poisoned,

    #[error("background task failed: {0}")]
    Join(String),
}
