//! 幂等重放：缓存（按幂等键保存整段事件序列）与其 TTL 存储

pub mod cache;
pub mod store;

pub use cache::{CachedResponse, ReplayCache, ReplayStatus};
pub use store::{InMemoryReplayStore, ReplayStore, DEFAULT_REPLAY_CAPACITY};
