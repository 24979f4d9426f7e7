//! Wayfarer CLI
//!
//! 用法：wayfarer [--config PATH] [--sse] [PROMPT...]（`--help` 查看说明）
//! 未给出 PROMPT 时从 stdin 读取；每个事件按帧打印到 stdout，Ctrl-C 取消当前会话。

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use wayfarer::agent::{create_chat_components, handle_chat, ChatRequest};
use wayfarer::config::load_config;
use wayfarer::memory::Message;
use wayfarer::stream::{EventEncoder, EventSink};

/// 运行一次对话会话，把协议事件逐帧打印到 stdout
#[derive(Debug, Parser)]
#[command(name = "wayfarer", version, about)]
struct CliArgs {
    /// 配置文件路径（默认 config/default.toml）
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 以 SSE 帧输出（默认 NDJSON）
    #[arg(long)]
    sse: bool,

    /// 用户消息；省略时从 stdin 读取
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

impl CliArgs {
    fn prompt(&self) -> Option<String> {
        (!self.prompt.is_empty()).then(|| self.prompt.join(" "))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wayfarer::observability::init();

    let args = CliArgs::parse();
    let prompt = match args.prompt() {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read prompt from stdin")?;
            buf
        }
    };
    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("empty prompt");
    }

    let cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let components = create_chat_components(&cfg).context("Failed to create chat components")?;
    let encoder = if args.sse {
        EventEncoder::sse()
    } else {
        EventEncoder::ndjson()
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let (sink, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            let frame = encoder.encode(&event)?;
            stdout.write_all(frame.as_bytes())?;
            stdout.flush()?;
        }
        anyhow::Ok(())
    });

    let request = ChatRequest::new(vec![Message::user(prompt)]);
    let result = handle_chat(&components, request, &sink, cancel).await;
    drop(sink);
    printer.await.context("printer task panicked")??;

    let response = result.context("Chat request failed")?;
    tracing::info!(message_id = %response.message_id, "session finished");
    Ok(())
}
