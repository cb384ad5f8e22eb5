//! relaybot-storage: SQLite-based conversation and execution history.
//!
//! The conversation table feeds prompt context; the execution table backs the
//! `!system` command and post-mortem inspection of job outcomes.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use relaybot_types::ExecutionStatus;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Author of a conversation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_db(s: &str) -> Self {
        if s == "assistant" {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationRow {
    pub role: Role,
    pub content: String,
    pub channel: String,
    pub chat_id: String,
    /// Unix millis.
    pub timestamp: i64,
}

/// One finished job.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionRow {
    pub prompt: String,
    pub output: String,
    pub status: ExecutionStatus,
    pub channel: String,
    pub chat_id: String,
    /// Unix millis.
    pub timestamp: i64,
    pub duration_ms: i64,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        channel TEXT NOT NULL,
        chat_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        prompt TEXT NOT NULL,
        output TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL CHECK(status IN ('success', 'error', 'timeout', 'cancelled')),
        channel TEXT NOT NULL,
        chat_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_conv_chat_ts ON conversations(chat_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_exec_ts ON executions(timestamp);";

/// SQLite-based storage for relaybot history.
pub struct HistoryStorage {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─── Conversations ───────────────────────────────────

    /// Append a conversation row.
    pub async fn save_message(&self, row: &ConversationRow) -> Result<()> {
        let conn = self.conn.clone();
        let row = row.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO conversations (role, content, channel, chat_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    row.role.as_str(),
                    row.content,
                    row.channel,
                    row.chat_id,
                    row.timestamp,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// The last `limit` rows of a conversation, oldest first.
    pub async fn recent_conversation(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRow>> {
        let conn = self.conn.clone();
        let chat_id = chat_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT role, content, channel, chat_id, timestamp
                 FROM conversations
                 WHERE chat_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(rusqlite::params![chat_id, limit as i64], |row| {
                    Ok(ConversationRow {
                        role: Role::from_db(&row.get::<_, String>(0)?),
                        content: row.get(1)?,
                        channel: row.get(2)?,
                        chat_id: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await?
    }

    // ─── Executions ───────────────────────────────────

    /// Record a finished job.
    pub async fn save_execution(&self, row: &ExecutionRow) -> Result<()> {
        let conn = self.conn.clone();
        let row = row.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO executions (prompt, output, status, channel, chat_id, timestamp, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.prompt,
                    row.output,
                    row.status.as_str(),
                    row.channel,
                    row.chat_id,
                    row.timestamp,
                    row.duration_ms,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// The most recent executions, newest first.
    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT prompt, output, status, channel, chat_id, timestamp, duration_ms
                 FROM executions
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| {
                    let status: String = row.get(2)?;
                    Ok(ExecutionRow {
                        prompt: row.get(0)?,
                        output: row.get(1)?,
                        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Error),
                        channel: row.get(3)?,
                        chat_id: row.get(4)?,
                        timestamp: row.get(5)?,
                        duration_ms: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }
}
