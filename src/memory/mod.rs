//! 记忆层：对话消息模型与对话轮次落库

pub mod conversation;
pub mod persistence;

pub use conversation::{last_user_message, Message, Role};
pub use persistence::{NoopTurnLog, SqliteTurnLog, TurnLog, TurnRecord};
