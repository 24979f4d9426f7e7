//! 协议事件：客户端可见的 token / tool_call / tool_result / error / done
//!
//! 线上格式是带 `type` 判别字段的紧凑 JSON；一个会话恰好一个 done，且 done 之后不再有任何事件。

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// 模型输出的文本增量
    Token { token: String },
    /// 工具调用（调用前发出）
    ToolCall { name: String, args: Value },
    /// 工具返回
    ToolResult { result: Value },
    /// 错误（工具失败、上游中断等；不终止会话）
    Error { error: String },
    /// 会话结束
    Done { message_id: String },
}

impl ProtocolEvent {
    pub fn token(text: impl Into<String>) -> Self {
        ProtocolEvent::Token { token: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProtocolEvent::Error {
            error: message.into(),
        }
    }

    pub fn done(message_id: impl Into<String>) -> Self {
        ProtocolEvent::Done {
            message_id: message_id.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolEvent::Done { .. })
    }

    /// 线上 `type` 字段值
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Token { .. } => "token",
            ProtocolEvent::ToolCall { .. } => "tool_call",
            ProtocolEvent::ToolResult { .. } => "tool_result",
            ProtocolEvent::Error { .. } => "error",
            ProtocolEvent::Done { .. } => "done",
        }
    }
}
