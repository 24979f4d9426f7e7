//! Wayfarer Web API
//!
//! 启动: cargo run --bin wayfarer-web --features web
//! - POST /api/chat          非流式，返回全部事件与完整回复
//! - POST /api/chat/stream   NDJSON 流（请求 stream=false 时同 /api/chat）
//! - POST /api/chat/sse      SSE 流
//! - GET  /api/tools         工具目录
//! - GET  /api/health
//!
//! 客户端断开时响应体被丢弃，事件接收端随之关闭，会话停止读流并放弃进行中的工具调用。

#![cfg(feature = "web")]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use wayfarer::agent::{collect_chat, create_chat_components, handle_chat, ChatComponents, ChatRequest, ChatResponse};
use wayfarer::config::load_config;
use wayfarer::core::ChatError;
use wayfarer::memory::last_user_message;
use wayfarer::stream::{EventEncoder, EventSink};
use wayfarer::tools::ToolSummary;

struct AppState {
    /// [app] name，健康检查里报告
    name: String,
    components: ChatComponents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wayfarer::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let components = create_chat_components(&cfg).context("Failed to create chat components")?;
    let state = Arc::new(AppState {
        name: cfg.app.name.clone(),
        components,
    });

    let app = Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/chat/sse", post(api_chat_sse))
        .route("/api/tools", get(api_tools_list))
        .route("/api/health", get(api_health))
        .with_state(state);

    let addr: SocketAddr = cfg
        .app
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", cfg.app.bind))?;
    tracing::info!("{} Web API: http://{}", cfg.app.name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn error_response(err: ChatError) -> (StatusCode, String) {
    let status = match err {
        ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// POST /api/chat：跑完整个会话后返回
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    collect_chat(&state.components, req)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/chat/stream：NDJSON，一行一个事件
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, (StatusCode, String)> {
    if !req.stream {
        return api_chat(State(state), Json(req))
            .await
            .map(IntoResponse::into_response);
    }
    stream_response(state, req, EventEncoder::ndjson())
}

/// POST /api/chat/sse：`data: <json>` 帧
async fn api_chat_sse(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, (StatusCode, String)> {
    stream_response(state, req, EventEncoder::sse())
}

/// 后台任务跑会话，事件经 mpsc 转成响应体流
fn stream_response(
    state: Arc<AppState>,
    req: ChatRequest,
    encoder: EventEncoder,
) -> Result<Response, (StatusCode, String)> {
    if last_user_message(&req.messages).is_none() {
        return Err((StatusCode::BAD_REQUEST, "messages must contain a user message".to_string()));
    }

    let (sink, event_rx) = EventSink::channel();
    tokio::spawn(async move {
        // 无论客户端是否断开都跑完收尾（done、重放缓存、落库）
        if let Err(e) = handle_chat(&state.components, req, &sink, CancellationToken::new()).await {
            tracing::warn!(error = %e, "chat request failed");
        }
    });

    let body = stream::unfold(event_rx, move |mut event_rx| async move {
        let event = event_rx.recv().await?;
        let frame = encoder.encode(&event).map(Bytes::from);
        Some((frame, event_rx))
    });

    let mut res = Response::new(Body::from_stream(body));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(encoder.content_type()),
    );
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(res)
}

async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": state.name}))
}

/// GET /api/tools：已注册工具及参数 schema
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<Vec<ToolSummary>> {
    Json(state.components.orchestrator.executor().registry().catalog())
}
