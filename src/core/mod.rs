//! 核心：错误类型与指数退避重试

pub mod error;
pub mod retry;

pub use error::{ChatError, PersistenceError, ToolError};
pub use retry::{retry, RetryPolicy};
