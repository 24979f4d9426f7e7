//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAYFARER__*` 覆盖（双下划线表示嵌套，如 `WAYFARER__LLM__PROVIDER=openai`）。
//! 所有字段都有默认值，缺省文件时也能启动（此时使用 Mock LLM 与 echo 工具）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub scanner: ScannerSection,
    pub replay: ReplaySection,
    pub persistence: PersistenceSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 服务名，出现在启动日志与 /api/health
    pub name: String,
    /// wayfarer-web 监听地址
    pub bind: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "wayfarer".to_string(),
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// [llm] 段：后端选择、超时与建流重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；有对应 API Key 时才会真正使用
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmModelSection,
    pub openai: LlmModelSection,
    pub timeouts: LlmTimeoutsSection,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
            timeouts: LlmTimeoutsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// 秒
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    /// 两个流块之间的最长间隔，0 表示不限
    pub stream_idle: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream_idle: 120,
        }
    }
}

impl LlmTimeoutsSection {
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle > 0).then(|| Duration::from_secs(self.stream_idle))
    }
}

/// 退避重试参数（[llm.retry] / [tools.retry]）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySection {
    /// 以给定的可重试判定构造策略
    pub fn policy<E>(&self, is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> RetryPolicy<E> {
        RetryPolicy::new(is_retryable)
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }
}

/// [tools] 段：单次调用超时、重试与后端地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒，含重试）
    pub tool_timeout_secs: u64,
    pub retry: RetrySection,
    pub flight_search: BackendSection,
    pub calendar: BackendSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            retry: RetrySection::default(),
            flight_search: BackendSection::default(),
            calendar: BackendSection::default(),
        }
    }
}

/// 工具后端；未配置 base_url 时不注册该工具
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// [scanner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    /// 单个未闭合标记允许缓冲的最大字节数
    pub max_marker_bytes: usize,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            max_marker_bytes: crate::stream::DEFAULT_MAX_MARKER_BYTES,
        }
    }
}

/// [replay] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            capacity: crate::replay::DEFAULT_REPLAY_CAPACITY,
        }
    }
}

/// [persistence] 段；未设置 sqlite_path 时不落库
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub sqlite_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 WAYFARER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAYFARER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAYFARER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
