//! 工具执行器
//!
//! execute(name, args, sink, ctx) 的步骤：查表（未知 → error 事件）→ 先发 tool_call →
//! 按 schema 校验参数（不通过 → error 事件，不调用）→ 在超时内经退避重试调用工具 →
//! 成功发 tool_result，失败发 error。任何情况下都不向调用方抛错，会话照常继续。
//! 每次调用输出结构化审计日志（JSON），带 correlation_id 便于跨系统追踪。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::{retry, RetryPolicy, ToolError};
use crate::stream::{EventSink, ProtocolEvent};
use crate::tools::{validate_arguments, ToolRegistry};

/// 审计日志里参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 单次调用的上下文：关联 id 与会话级取消令牌
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub correlation_id: String,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn new(correlation_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            cancel,
        }
    }
}

/// 一次工具调用的结果（事件已在执行器内发出，这里供编排器记账）
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(Value),
    Failed(ToolError),
    /// 会话被取消，未发出结果事件
    Cancelled,
}

/// 工具执行器：只读注册表 + 每次调用的超时与重试策略
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    policy: RetryPolicy<ToolError>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            policy: RetryPolicy::new(ToolError::is_retryable),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy<ToolError>) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行一次工具调用，事件按 tool_call → tool_result | error 的顺序写入 sink
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        sink: &EventSink,
        ctx: &InvocationContext,
    ) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let Some(tool) = self.registry.lookup(name) else {
            tracing::warn!(tool = %name, correlation_id = %ctx.correlation_id, "unknown tool");
            let err = ToolError::UnknownTool(name.to_string());
            sink.emit(ProtocolEvent::error(err.to_string()));
            audit(name, "unknown_tool", &ctx.correlation_id, start, &args_preview);
            return ToolOutcome::Failed(err);
        };

        sink.emit(ProtocolEvent::ToolCall {
            name: name.to_string(),
            args: args.clone(),
        });
        tracing::info!(tool = %name, correlation_id = %ctx.correlation_id, "tool call started");

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &args) {
            let err = ToolError::InvalidArguments(reason);
            sink.emit(ProtocolEvent::error(format!("tool `{name}` failed: {err}")));
            audit(name, "invalid_arguments", &ctx.correlation_id, start, &args_preview);
            return ToolOutcome::Failed(err);
        }

        let policy = if tool.idempotent() {
            self.policy.clone()
        } else {
            self.policy.clone().with_max_attempts(1)
        };
        let invocation = timeout(
            self.timeout,
            retry(&policy, || tool.invoke(args.clone())),
        );

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                audit(name, "cancelled", &ctx.correlation_id, start, &args_preview);
                return ToolOutcome::Cancelled;
            }
            result = invocation => match result {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Timeout(self.timeout)),
            },
        };

        match result {
            Ok(value) => {
                audit(name, "ok", &ctx.correlation_id, start, &args_preview);
                sink.emit(ProtocolEvent::ToolResult {
                    result: value.clone(),
                });
                ToolOutcome::Completed(value)
            }
            Err(err) => {
                let outcome = if matches!(err, ToolError::Timeout(_)) {
                    "timeout"
                } else {
                    "error"
                };
                tracing::warn!(tool = %name, correlation_id = %ctx.correlation_id, error = %err, "tool call failed");
                audit(name, outcome, &ctx.correlation_id, start, &args_preview);
                sink.emit(ProtocolEvent::error(format!("tool `{name}` failed: {err}")));
                ToolOutcome::Failed(err)
            }
        }
    }
}

fn audit(tool: &str, outcome: &str, correlation_id: &str, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
        "correlation_id": correlation_id,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
