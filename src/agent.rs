//! Headless 聊天运行时
//!
//! 供 CLI 与 HTTP 前端调用：create_chat_components 按配置构建 LLM、工具注册表、执行器、
//! 编排器、重放缓存与落库；handle_chat 处理一次请求（重放命中则直接重发缓存的事件）。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{ChatError, ToolError};
use crate::llm::{LlmClient, LlmError, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::memory::{last_user_message, Message, NoopTurnLog, SqliteTurnLog, TurnLog, TurnRecord};
use crate::replay::{CachedResponse, InMemoryReplayStore, ReplayCache, ReplayStatus};
use crate::stream::{EventSink, ProtocolEvent, SessionOutcome, StreamOrchestrator};
use crate::tools::{
    CalendarQueryTool, EchoTool, FlightSearchTool, InvocationContext, ToolExecutor, ToolRegistry,
};

/// 一次聊天请求
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// false 时一次性返回全部事件
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            stream: true,
            idempotency_key: None,
            correlation_id: None,
            session_id: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// 一次请求的完整结果（非流式请求的响应体）
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message_id: String,
    pub transcript: String,
    pub events: Vec<ProtocolEvent>,
    /// 是否来自重放缓存
    pub replayed: bool,
}

/// 预构建的聊天组件，可在所有会话间共享
pub struct ChatComponents {
    pub orchestrator: StreamOrchestrator,
    pub replay: ReplayCache,
    pub turn_log: Arc<dyn TurnLog>,
    pub replay_ttl: Duration,
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = provider == "deepseek" && (has_deepseek_key || has_openai_key);
    let use_openai = provider == "openai" && has_openai_key;

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(OpenAiClient::deepseek(&model))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None))
    } else {
        tracing::warn!(provider = %provider, "No API key set or provider is mock, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 注册工具：echo 始终可用，航班搜索 / 日历查询仅在配置了后端地址时注册
pub fn build_registry(cfg: &AppConfig) -> Result<ToolRegistry, ChatError> {
    let timeout = Duration::from_secs(cfg.tools.tool_timeout_secs.max(1));
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);

    if let Some(base_url) = &cfg.tools.flight_search.base_url {
        let tool = FlightSearchTool::new(base_url, cfg.tools.flight_search.api_key.clone(), timeout)
            .map_err(|e| ChatError::ConfigError(format!("flight_search: {e}")))?;
        registry.register(tool);
    }
    if let Some(base_url) = &cfg.tools.calendar.base_url {
        let tool = CalendarQueryTool::new(base_url, cfg.tools.calendar.api_key.clone(), timeout)
            .map_err(|e| ChatError::ConfigError(format!("calendar: {e}")))?;
        registry.register(tool);
    }
    tracing::info!(tools = ?registry.tool_ids(), "tool registry ready");
    Ok(registry)
}

/// 按配置构建全部组件
pub fn create_chat_components(cfg: &AppConfig) -> Result<ChatComponents, ChatError> {
    let llm = create_llm_from_config(cfg);
    let turn_log: Arc<dyn TurnLog> = match &cfg.persistence.sqlite_path {
        Some(path) => Arc::new(SqliteTurnLog::open(path)?),
        None => Arc::new(NoopTurnLog),
    };
    build_chat_components(cfg, llm, build_registry(cfg)?, turn_log)
}

/// 用给定的 LLM、注册表与落库构建组件（测试与嵌入方使用）
pub fn build_chat_components(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    turn_log: Arc<dyn TurnLog>,
) -> Result<ChatComponents, ChatError> {
    if cfg.tools.tool_timeout_secs == 0 {
        return Err(ChatError::ConfigError("tools.tool_timeout_secs must be > 0".into()));
    }
    let request_timeout = (cfg.llm.timeouts.request > 0).then(|| Duration::from_secs(cfg.llm.timeouts.request));
    let llm: Arc<dyn LlmClient> = Arc::new(
        RetryingLlmClient::new(llm, cfg.llm.retry.policy(LlmError::is_retryable))
            .with_attempt_timeout(request_timeout),
    );
    let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(cfg.tools.tool_timeout_secs))
        .with_retry_policy(cfg.tools.retry.policy(ToolError::is_retryable));
    let orchestrator = StreamOrchestrator::new(llm, Arc::new(executor))
        .with_max_marker_bytes(cfg.scanner.max_marker_bytes)
        .with_idle_timeout(cfg.llm.timeouts.stream_idle_timeout());
    let replay = ReplayCache::new(Arc::new(InMemoryReplayStore::new(cfg.replay.capacity)));

    Ok(ChatComponents {
        orchestrator,
        replay,
        turn_log,
        replay_ttl: Duration::from_secs(cfg.replay.ttl_secs),
    })
}

/// 处理一次请求：事件按序写入 sink。只有非法请求会返回 Err（此时未发出任何事件）
pub async fn handle_chat(
    components: &ChatComponents,
    request: ChatRequest,
    sink: &EventSink,
    cancel: CancellationToken,
) -> Result<ChatResponse, ChatError> {
    let Some(user_message) = last_user_message(&request.messages).map(str::to_string) else {
        return Err(ChatError::InvalidRequest("messages must contain a user message".into()));
    };
    let correlation_id = request
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| correlation_id.clone());
    tracing::info!(
        correlation_id = %correlation_id,
        session_id = %session_id,
        keyed = request.idempotency_key.is_some(),
        "chat request"
    );

    if let Some(key) = &request.idempotency_key {
        if let Some(cached) = components.replay.lookup(key).await {
            tracing::info!(correlation_id = %correlation_id, key = %key, "replaying cached response");
            for event in &cached.events {
                sink.emit(event.clone());
            }
            return Ok(ChatResponse {
                message_id: cached.message_id,
                transcript: cached.transcript,
                events: cached.events,
                replayed: true,
            });
        }
    }

    let ctx = InvocationContext::new(correlation_id.clone(), cancel);
    let outcome = components
        .orchestrator
        .run(&request.messages, sink, &ctx)
        .await;
    let events = sink.emitted();

    if let Some(key) = &request.idempotency_key {
        remember(components, key, &outcome, &events).await;
    }

    let record = TurnRecord {
        session_id,
        correlation_id: correlation_id.clone(),
        user_message,
        assistant_transcript: outcome.transcript.clone(),
        tool_calls: outcome.tool_calls.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = components.turn_log.log_turn(record).await {
        tracing::error!(correlation_id = %correlation_id, error = %e, "failed to persist turn");
    }

    Ok(ChatResponse {
        message_id: outcome.message_id,
        transcript: outcome.transcript,
        events,
        replayed: false,
    })
}

/// 只缓存正常结束的会话；取消或上游失败的请求应允许客户端用同一个键重试
async fn remember(components: &ChatComponents, key: &str, outcome: &SessionOutcome, events: &[ProtocolEvent]) {
    if !outcome.is_clean() {
        tracing::debug!(key = %key, "session not clean, skipping replay cache");
        return;
    }
    let status = if outcome.tool_errors > 0 {
        ReplayStatus::CompletedWithToolErrors
    } else {
        ReplayStatus::Completed
    };
    let cached = CachedResponse {
        status,
        message_id: outcome.message_id.clone(),
        transcript: outcome.transcript.clone(),
        events: events.to_vec(),
    };
    if let Err(e) = components.replay.store(key, &cached, components.replay_ttl).await {
        tracing::warn!(key = %key, error = %e, "failed to cache response");
    }
}

/// 非流式：跑完整个会话后一次性返回
pub async fn collect_chat(components: &ChatComponents, request: ChatRequest) -> Result<ChatResponse, ChatError> {
    let (sink, _rx) = EventSink::channel();
    handle_chat(components, request, &sink, CancellationToken::new()).await
}
