//! 对话轮次落库
//!
//! 会话关闭后把 TurnRecord 交给 TurnLog；失败只记 error 日志，不回传客户端（done 已发出）。
//! SqliteTurnLog 基于 rusqlite，阻塞调用放到 spawn_blocking 里执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::core::PersistenceError;
use crate::stream::ToolCallRecord;

/// 一轮对话的完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub correlation_id: String,
    pub user_message: String,
    pub assistant_transcript: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
}

/// 持久化协作者：每个关闭的会话调用一次
#[async_trait]
pub trait TurnLog: Send + Sync {
    async fn log_turn(&self, record: TurnRecord) -> Result<(), PersistenceError>;
}

/// 丢弃一切记录
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTurnLog;

#[async_trait]
impl TurnLog for NoopTurnLog {
    async fn log_turn(&self, _record: TurnRecord) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// SQLite 落库：单连接 + 互斥锁
#[derive(Debug, Clone)]
pub struct SqliteTurnLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTurnLog {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                assistant_transcript TEXT NOT NULL,
                tool_calls TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 某会话最近 limit 轮（新在前）
    pub async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<TurnRecord>, PersistenceError> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| PersistenceError::Poisoned)?;
            let mut stmt = conn.prepare(
                "SELECT session_id, correlation_id, user_message, assistant_transcript, tool_calls, created_at
                 FROM turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                ))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (session_id, correlation_id, user_message, assistant_transcript, tool_calls, created_at) = row?;
                records.push(TurnRecord {
                    session_id,
                    correlation_id,
                    user_message,
                    assistant_transcript,
                    tool_calls: serde_json::from_str(&tool_calls)?,
                    created_at,
                });
            }
            Ok(records)
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))?
    }

    pub async fn count(&self) -> Result<usize, PersistenceError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| PersistenceError::Poisoned)?;
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))?
    }
}

#[async_trait]
impl TurnLog for SqliteTurnLog {
    async fn log_turn(&self, record: TurnRecord) -> Result<(), PersistenceError> {
        let conn = Arc::clone(&self.conn);
        let tool_calls = serde_json::to_string(&record.tool_calls)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| PersistenceError::Poisoned)?;
            conn.execute(
                "INSERT INTO turns (session_id, correlation_id, user_message, assistant_transcript, tool_calls, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.session_id,
                    record.correlation_id,
                    record.user_message,
                    record.assistant_transcript,
                    tool_calls,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))?
    }
}
