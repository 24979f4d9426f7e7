//! 幂等重放缓存
//!
//! 先 lookup 再 store 的检查后执行模式：同一幂等键的并发请求在第一个完成前都会未命中，
//! 都会执行一遍（不做请求合并）。缓存体是整段事件序列，命中时按原序重发。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::replay::ReplayStore;
use crate::stream::ProtocolEvent;

/// 缓存时会话的结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Completed,
    /// 会话正常结束，但其中有工具调用失败
    CompletedWithToolErrors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: ReplayStatus,
    pub message_id: String,
    pub transcript: String,
    pub events: Vec<ProtocolEvent>,
}

#[derive(Clone)]
pub struct ReplayCache {
    store: Arc<dyn ReplayStore>,
}

impl ReplayCache {
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self { store }
    }

    /// 命中返回缓存的响应；条目损坏按未命中处理
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(response) => {
                tracing::debug!(key = %key, "replay hit");
                Some(response)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt replay entry ignored");
                None
            }
        }
    }

    pub async fn store(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_string(response)?;
        self.store.put(key, raw, ttl).await;
        tracing::debug!(key = %key, events = response.events.len(), "replay stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::InMemoryReplayStore;
    use serde_json::json;

    fn response() -> CachedResponse {
        CachedResponse {
            status: ReplayStatus::Completed,
            message_id: "msg-1".into(),
            transcript: "Checking flights.  Done.".into(),
            events: vec![
                ProtocolEvent::token("Checking flights. "),
                ProtocolEvent::ToolCall {
                    name: "search".into(),
                    args: json!({"origin": "SFO", "destination": "CDG"}),
                },
                ProtocolEvent::ToolResult { result: json!({"flights": []}) },
                ProtocolEvent::token(" Done."),
                ProtocolEvent::done("msg-1"),
            ],
        }
    }

    #[tokio::test]
    async fn test_store_then_lookup_returns_same_value() {
        let cache = ReplayCache::new(Arc::new(InMemoryReplayStore::default()));
        assert_eq!(cache.lookup("K").await, None);
        cache
            .store("K", &response(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.lookup("K").await, Some(response()));
        assert_eq!(cache.lookup("other").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(InMemoryReplayStore::default());
        store.put("K", "{not json".into(), Duration::from_secs(60)).await;
        let cache = ReplayCache::new(store);
        assert_eq!(cache.lookup("K").await, None);
    }
}
