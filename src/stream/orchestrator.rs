//! 流编排器：一次聊天请求一个会话
//!
//! 状态机 Open → Streaming → Draining → Closed：
//! - Open：向模型请求流；建流失败（重试后）直接收尾。
//! - Streaming：逐块喂给扫描器，文本立即作为 token 发出；提取出的调用交给执行器，
//!   调用进行中继续读块，但之后产出的文本 / 调用排队，等该调用的 tool_result | error 发出后再放行。
//! - Draining：上游结束或读失败，flush 扫描器，执行剩余调用。
//! - Closed：（如有）追加上游错误事件，恰好一个 done。
//!
//! 客户端断开（接收端丢弃）或取消令牌触发时停止读流，丢弃进行中的工具调用，不等待其完成。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::Message;
use crate::stream::{EventSink, MarkerScanner, ProtocolEvent, ScanItem, ScanOutput, ToolCallRecord};
use crate::tools::{InvocationContext, ToolExecutor, ToolOutcome};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Streaming,
    Draining,
    Closed,
}

/// 会话结束后的汇总（交给重放缓存与落库）
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub message_id: String,
    /// 所有 token 事件拼接而成的完整回复
    pub transcript: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_errors: usize,
    pub upstream_error: Option<LlmError>,
    pub cancelled: bool,
    pub final_state: SessionState,
}

impl SessionOutcome {
    /// 正常结束（未取消、上游无错误）
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.upstream_error.is_none()
    }
}

pub struct StreamOrchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    max_marker_bytes: usize,
    idle_timeout: Option<Duration>,
}

impl StreamOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            llm,
            executor,
            max_marker_bytes: crate::stream::DEFAULT_MAX_MARKER_BYTES,
            idle_timeout: None,
        }
    }

    pub fn with_max_marker_bytes(mut self, max_marker_bytes: usize) -> Self {
        self.max_marker_bytes = max_marker_bytes;
        self
    }

    /// 两块之间的最长等待；超时按上游错误处理
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// 运行一个会话直到 Closed；事件按序写入 sink，返回值从不是错误
    pub async fn run(&self, messages: &[Message], sink: &EventSink, ctx: &InvocationContext) -> SessionOutcome {
        let message_id = Uuid::new_v4().to_string();
        let cancel = ctx.cancel.child_token();
        let mut run = SessionRun::new(
            &self.executor,
            sink,
            InvocationContext::new(ctx.correlation_id.clone(), cancel.clone()),
        );
        let mut scanner = MarkerScanner::with_max_marker_bytes(self.max_marker_bytes);
        tracing::debug!(correlation_id = %ctx.correlation_id, %message_id, "session open");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = sink.disconnected() => None,
            result = self.llm.complete_stream(messages) => Some(result),
        };
        let mut stream: Option<TokenStream> = match opened {
            None => {
                run.cancelled = true;
                None
            }
            Some(Ok(stream)) => {
                run.transition(SessionState::Streaming);
                Some(stream)
            }
            Some(Err(e)) => {
                tracing::warn!(correlation_id = %ctx.correlation_id, error = %e, "model stream failed to open");
                run.upstream_error = Some(e);
                None
            }
        };

        if !run.cancelled {
            let idle_timeout = self.idle_timeout;
            let mut upstream_done = stream.is_none();
            if upstream_done {
                run.drain(&mut scanner);
            }
            loop {
                if upstream_done && run.in_flight.is_none() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        run.abandon();
                        break;
                    }
                    _ = sink.disconnected() => {
                        tracing::info!(correlation_id = %ctx.correlation_id, "client disconnected");
                        cancel.cancel();
                        run.abandon();
                        break;
                    }
                    finished = wait_in_flight(&mut run.in_flight), if run.in_flight.is_some() => {
                        run.in_flight = None;
                        run.finish(finished);
                        run.release();
                    }
                    chunk = next_chunk(&mut stream, idle_timeout), if !upstream_done => match chunk {
                        Some(Ok(text)) => {
                            run.enqueue(scanner.consume(&text));
                            run.release();
                        }
                        Some(Err(e)) => {
                            tracing::warn!(correlation_id = %ctx.correlation_id, error = %e, "model stream failed mid-response");
                            run.upstream_error = Some(e);
                            upstream_done = true;
                            stream = None;
                            run.drain(&mut scanner);
                        }
                        None => {
                            upstream_done = true;
                            stream = None;
                            run.drain(&mut scanner);
                        }
                    },
                }
            }
        }
        drop(stream);
        if scanner.dropped_calls() > 0 {
            tracing::debug!(dropped = scanner.dropped_calls(), "malformed tool calls dropped");
        }
        run.close(message_id)
    }
}

/// 单个会话的可变状态；只被一个编排循环独占
struct SessionRun<'a> {
    executor: &'a ToolExecutor,
    sink: &'a EventSink,
    ctx: InvocationContext,
    state: SessionState,
    /// 等待进行中调用结束后才能放行的文本与调用
    pending: VecDeque<ScanItem>,
    in_flight: Option<BoxFuture<'a, ToolOutcome>>,
    transcript: String,
    tool_calls: Vec<ToolCallRecord>,
    tool_errors: usize,
    upstream_error: Option<LlmError>,
    cancelled: bool,
}

impl<'a> SessionRun<'a> {
    fn new(executor: &'a ToolExecutor, sink: &'a EventSink, ctx: InvocationContext) -> Self {
        Self {
            executor,
            sink,
            ctx,
            state: SessionState::Open,
            pending: VecDeque::new(),
            in_flight: None,
            transcript: String::new(),
            tool_calls: Vec::new(),
            tool_errors: 0,
            upstream_error: None,
            cancelled: false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(correlation_id = %self.ctx.correlation_id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// 入队；与队尾相邻的文本合并
    fn enqueue(&mut self, output: ScanOutput) {
        for item in output.items {
            if let ScanItem::Text(text) = &item {
                if let Some(ScanItem::Text(last)) = self.pending.back_mut() {
                    last.push_str(text);
                    continue;
                }
            }
            self.pending.push_back(item);
        }
    }

    /// 没有调用在进行时，按序放行排队的文本与调用（遇到调用即启动并停下）
    fn release(&mut self) {
        while self.in_flight.is_none() {
            match self.pending.pop_front() {
                Some(ScanItem::Text(text)) => {
                    self.transcript.push_str(&text);
                    self.sink.emit(ProtocolEvent::token(text));
                }
                Some(ScanItem::Call(call)) => self.dispatch(call),
                None => break,
            }
        }
    }

    fn dispatch(&mut self, call: ToolCallRecord) {
        self.tool_calls.push(call.clone());
        let executor = self.executor;
        let sink = self.sink;
        let ctx = self.ctx.clone();
        self.in_flight = Some(Box::pin(async move {
            executor.execute(&call.name, call.arguments, sink, &ctx).await
        }));
    }

    fn finish(&mut self, outcome: ToolOutcome) {
        if let ToolOutcome::Failed(_) = outcome {
            self.tool_errors += 1;
        }
    }

    fn drain(&mut self, scanner: &mut MarkerScanner) {
        self.transition(SessionState::Draining);
        self.enqueue(scanner.flush());
        self.release();
    }

    /// 取消：丢弃进行中的调用与排队内容
    fn abandon(&mut self) {
        self.cancelled = true;
        self.in_flight = None;
        self.pending.clear();
    }

    fn close(mut self, message_id: String) -> SessionOutcome {
        if self.cancelled {
            self.sink.emit(ProtocolEvent::error("request cancelled"));
        } else if let Some(err) = &self.upstream_error {
            self.sink.emit(ProtocolEvent::error(format!("upstream model error: {err}")));
        }
        self.transition(SessionState::Closed);
        self.sink.emit(ProtocolEvent::done(message_id.clone()));
        SessionOutcome {
            message_id,
            transcript: self.transcript,
            tool_calls: self.tool_calls,
            tool_errors: self.tool_errors,
            upstream_error: self.upstream_error,
            cancelled: self.cancelled,
            final_state: self.state,
        }
    }
}

async fn wait_in_flight(slot: &mut Option<BoxFuture<'_, ToolOutcome>>) -> ToolOutcome {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_chunk(stream: &mut Option<TokenStream>, idle_timeout: Option<Duration>) -> Option<Result<String, LlmError>> {
    let Some(stream) = stream.as_mut() else {
        return std::future::pending().await;
    };
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(item) => item,
            Err(_) => Some(Err(LlmError::Timeout)),
        },
        None => stream.next().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;
    use crate::llm::MockLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// 延迟 delay 后回显参数的 search 工具
    struct StubSearch {
        delay: Duration,
    }

    #[async_trait]
    impl Tool for StubSearch {
        fn id(&self) -> &str {
            "search"
        }
        fn description(&self) -> &str {
            "stub flight search"
        }
        async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({"flights": [{"from": args["origin"], "to": args["destination"]}]}))
        }
    }

    fn orchestrator(llm: MockLlmClient, tool_delay: Duration) -> StreamOrchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(StubSearch { delay: tool_delay });
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(30));
        StreamOrchestrator::new(Arc::new(llm), Arc::new(executor))
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("corr-test", CancellationToken::new())
    }

    fn kinds(events: &[ProtocolEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_scenario_split_inside_args() {
        let llm = MockLlmClient::scripted([
            r#"Checking flights. <call name=search args={"origin":"SF"#,
            r#"O","destination":"CDG"}/> Done."#,
        ]);
        let orch = orchestrator(llm, Duration::from_millis(50));
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("SFO to Paris")], &sink, &ctx()).await;

        let events = sink.emitted();
        assert_eq!(
            events[..4],
            [
                ProtocolEvent::token("Checking flights. "),
                ProtocolEvent::ToolCall {
                    name: "search".into(),
                    args: json!({"origin": "SFO", "destination": "CDG"}),
                },
                ProtocolEvent::ToolResult {
                    result: json!({"flights": [{"from": "SFO", "to": "CDG"}]}),
                },
                ProtocolEvent::token(" Done."),
            ]
        );
        assert_eq!(events[4], ProtocolEvent::done(outcome.message_id.clone()));
        assert_eq!(outcome.transcript, "Checking flights.  Done.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.final_state, SessionState::Closed);
        assert!(outcome.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_after_marker_waits_for_slow_tool() {
        // 工具耗时远大于后续块的间隔：后续文本在调用期间到达，但必须排在 tool_result 之后
        let llm = MockLlmClient::scripted([
            r#"a <call name=search args={"origin":"SFO","destination":"CDG"}/>"#,
            " b",
            " c",
        ])
        .with_chunk_delay(Duration::from_millis(10));
        let orch = orchestrator(llm, Duration::from_secs(3));
        let (sink, _rx) = EventSink::channel();
        orch.run(&[Message::user("go")], &sink, &ctx()).await;

        let events = sink.emitted();
        assert_eq!(
            kinds(&events),
            vec!["token", "tool_call", "tool_result", "token", "done"]
        );
        assert_eq!(events[3], ProtocolEvent::token(" b c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_closes_cleanly() {
        let llm = MockLlmClient::scripted(["partial ", "answer", "never"])
            .with_stream_error_after(2, "connection reset");
        let orch = orchestrator(llm, Duration::ZERO);
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;

        let events = sink.emitted();
        assert_eq!(kinds(&events), vec!["token", "token", "error", "done"]);
        assert!(matches!(outcome.upstream_error, Some(LlmError::Stream(_))));
        assert_eq!(outcome.transcript, "partial answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_still_emits_done() {
        let llm = MockLlmClient::scripted(["x"])
            .with_open_failures(1, LlmError::ApiError("bad key".into()));
        let orch = orchestrator(llm, Duration::ZERO);
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;
        assert_eq!(kinds(&sink.emitted()), vec!["error", "done"]);
        assert!(!outcome.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dangling_marker_flushed_as_text() {
        let llm = MockLlmClient::scripted(["see <call name=search args={\"origin\""]);
        let orch = orchestrator(llm, Duration::ZERO);
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;
        assert_eq!(outcome.transcript, "see <call name=search args={\"origin\"");
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(sink.emitted().last().map(|e| e.kind()), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_does_not_stop_session() {
        let llm = MockLlmClient::scripted([r#"x <call name=hotel args={}/> y"#]);
        let orch = orchestrator(llm, Duration::ZERO);
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;
        assert_eq!(kinds(&sink.emitted()), vec!["token", "error", "token", "done"]);
        assert_eq!(outcome.tool_errors, 1);
        assert!(outcome.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_in_flight_tool() {
        let llm = MockLlmClient::scripted([
            r#"a <call name=search args={"origin":"SFO","destination":"CDG"}/> b"#,
        ]);
        let orch = orchestrator(llm, Duration::from_secs(600));
        let (sink, _rx) = EventSink::channel();
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let started = tokio::time::Instant::now();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outcome.cancelled);
        assert_eq!(kinds(&sink.emitted()), vec!["token", "tool_call", "error", "done"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_stops_reading() {
        let llm = MockLlmClient::scripted(["one ", "two ", "three ", "four "])
            .with_chunk_delay(Duration::from_secs(1));
        let orch = orchestrator(llm, Duration::ZERO);
        let (sink, rx) = EventSink::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            drop(rx);
        });
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.transcript, "one ");
    }

    /// 记录完成次数的慢工具
    struct CountingSearch {
        delay: Duration,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingSearch {
        fn id(&self) -> &str {
            "search"
        }
        fn description(&self) -> &str {
            "slow flight search that counts completions"
        }
        async fn invoke(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"flights": []}))
        }
    }

    fn counting_orchestrator(llm: MockLlmClient, delay: Duration) -> (StreamOrchestrator, Arc<AtomicUsize>) {
        let completed = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingSearch {
            delay,
            completed: completed.clone(),
        });
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(900));
        (StreamOrchestrator::new(Arc::new(llm), Arc::new(executor)), completed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_during_tool_call_keeps_order() {
        let llm = MockLlmClient::scripted([
            r#"a <call name=search args={"origin":"SFO","destination":"CDG"}/>"#,
            " queued",
            "never",
        ])
        .with_chunk_delay(Duration::from_millis(10))
        .with_stream_error_after(2, "connection reset");
        let (orch, completed) = counting_orchestrator(llm, Duration::from_secs(3));
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;

        let events = sink.emitted();
        assert_eq!(
            kinds(&events),
            vec!["token", "tool_call", "tool_result", "token", "error", "done"]
        );
        assert_eq!(events[3], ProtocolEvent::token(" queued"));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.upstream_error, Some(LlmError::Stream(_))));
        assert!(!outcome.cancelled);
        assert_eq!(outcome.transcript, "a  queued");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_tool_call_abandons_it() {
        let llm = MockLlmClient::scripted([
            r#"a <call name=search args={"origin":"SFO","destination":"CDG"}/>"#,
            " queued",
        ])
        .with_chunk_delay(Duration::from_millis(10));
        let (orch, completed) = counting_orchestrator(llm, Duration::from_secs(600));
        let (sink, rx) = EventSink::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(rx);
        });
        let started = tokio::time::Instant::now();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outcome.cancelled);
        assert_eq!(outcome.transcript, "a ");
        assert_eq!(kinds(&sink.emitted()), vec!["token", "tool_call", "error", "done"]);

        // 被丢弃的调用不会在之后悄悄完成
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_is_upstream_error() {
        let llm = MockLlmClient::scripted(["slow"]).with_chunk_delay(Duration::from_secs(30));
        let orch = orchestrator(llm, Duration::ZERO).with_idle_timeout(Some(Duration::from_secs(5)));
        let (sink, _rx) = EventSink::channel();
        let outcome = orch.run(&[Message::user("go")], &sink, &ctx()).await;
        assert_eq!(outcome.upstream_error, Some(LlmError::Timeout));
        assert_eq!(kinds(&sink.emitted()), vec!["error", "done"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_done() {
        let llm = MockLlmClient::new();
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::EchoTool);
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5));
        let orch = StreamOrchestrator::new(Arc::new(llm), Arc::new(executor));
        let (sink, _rx) = EventSink::channel();
        orch.run(&[Message::user("hello")], &sink, &ctx()).await;

        let events = sink.emitted();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(|e| e.is_terminal()));
        assert!(kinds(&events).contains(&"tool_result"));
    }
}
