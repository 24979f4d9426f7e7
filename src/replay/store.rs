//! 重放存储协作者：带 TTL 的键值存储
//!
//! 引擎只依赖 get / put 两个操作；InMemoryReplayStore 是进程内实现，
//! 读取时惰性淘汰过期项，超出容量时淘汰最早过期的一项。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// 默认容量
pub const DEFAULT_REPLAY_CAPACITY: usize = 1024;

#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// 未命中或已过期返回 None
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: String, ttl: Duration);
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryReplayStore {
    entries: RwLock<HashMap<String, Entry>>,
    capacity: usize,
}

impl Default for InMemoryReplayStore {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

impl InMemoryReplayStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// 当前条目数（含尚未被惰性清理的过期项）
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 清理所有已过期条目，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    tracing::debug!(key = %victim, "replay store full, evicting");
                    entries.remove(&victim);
                }
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}
