//! 工具注册表
//!
//! 所有工具实现 Tool trait（id / display_name / description / parameters_schema / invoke），
//! 由 ToolRegistry 按 id 注册；启动时填充一次，随后包进 Arc 在所有会话间只读共享，无需加锁。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;

/// 工具定义：标识、展示名、参数 schema 与调用入口
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具 id（标记中的 name）
    fn id(&self) -> &str;

    /// 展示名，默认同 id
    fn display_name(&self) -> &str {
        self.id()
    }

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认接受任意对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 重复调用是否安全；false 时执行器只尝试一次
    fn idempotent(&self) -> bool {
        true
    }

    /// 调用后端；args 已通过 schema 校验
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// 目录条目（GET /api/tools）
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 tool.id() 注册；同 id 后注册者覆盖
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        if self.tools.insert(id.clone(), tool).is_some() {
            tracing::warn!(tool = %id, "tool registered twice, keeping the latest");
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// 排序后的 id 列表
    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn catalog(&self) -> Vec<ToolSummary> {
        let mut items: Vec<ToolSummary> = self
            .tools
            .values()
            .map(|tool| ToolSummary {
                id: tool.id().to_string(),
                display_name: tool.display_name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}
