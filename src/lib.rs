//! Wayfarer - Rust 流式对话后端
//!
//! 模块划分：
//! - **agent**: 无头聊天运行时（组件构建、单次请求处理，供 CLI / HTTP 调用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与指数退避重试
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话消息与对话轮次落库
//! - **observability**: 日志初始化
//! - **replay**: 幂等重放缓存
//! - **stream**: 标记扫描、协议事件、编码与会话编排
//! - **tools**: 工具注册表、参数校验、执行器与具体工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod replay;
pub mod stream;
pub mod tools;
