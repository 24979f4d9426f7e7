//! 可观测性：tracing 日志初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖；日志写到 stderr，stdout 留给事件帧。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认过滤指令
const DEFAULT_DIRECTIVE: &str = "info";

pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

/// 以给定默认指令初始化；RUST_LOG 存在时优先。重复调用无副作用
pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
