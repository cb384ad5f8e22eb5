use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────── Routing Types ────────────────────

/// Where a request came from and where its output must be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Channel type (e.g. "slack", "github", "console").
    pub channel_type: String,
    /// Conversation identifier on that channel.
    pub chat_id: String,
    /// Thread to reply into, for channels that support threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Destination {
    pub fn new(channel_type: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            chat_id: chat_id.into(),
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_type, self.chat_id)
    }
}

// ──────────────────── Channel Types ────────────────────

/// Message from an external channel to the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message identifier.
    pub id: String,
    /// Channel type (e.g. "slack", "github").
    pub channel_type: String,
    /// Conversation identifier.
    pub chat_id: String,
    /// External user/sender identifier.
    pub sender_id: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Message text content.
    pub text: String,
    /// Thread the message was posted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Message timestamp (unix millis).
    pub timestamp: i64,
}

impl InboundMessage {
    /// The destination replies to this message should go to.
    pub fn destination(&self) -> Destination {
        Destination::new(&self.channel_type, &self.chat_id).with_thread(self.thread_id.clone())
    }
}

/// Status of a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Channel is not running.
    Stopped,
    /// Channel is initializing.
    Starting,
    /// Channel is running and accepting messages.
    Running,
    /// Channel encountered an error.
    Error(String),
}

// ──────────────────── Execution Types ────────────────────

/// Coarse classification of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("auth_error")]
    Auth,
    #[error("rate_limit")]
    RateLimit,
    /// The process itself reported a timeout on stderr.
    #[error("timeout")]
    Timeout,
    #[error("exit_code_{}: {stderr}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },
    #[error("Spawn error: {0}")]
    Spawn(String),
    /// The runner's deadline elapsed.
    #[error("Timed out")]
    TimedOut,
    /// The running process was cancelled.
    #[error("Cancelled")]
    Cancelled,
    /// The job was removed before it started.
    #[error("Cancelled from queue")]
    Dequeued,
    #[error("Worker failure: {0}")]
    Worker(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Outcome of one job. Exactly one is produced per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<ExecutionError>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
            timed_out: false,
        }
    }

    pub fn failure(output: impl Into<String>, error: ExecutionError) -> Self {
        Self {
            output: output.into(),
            timed_out: error == ExecutionError::TimedOut,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// History status for this result.
    pub fn status(&self) -> ExecutionStatus {
        match &self.error {
            None => ExecutionStatus::Success,
            Some(_) if self.timed_out => ExecutionStatus::Timeout,
            Some(ExecutionError::Cancelled | ExecutionError::Dequeued) => {
                ExecutionStatus::Cancelled
            }
            Some(_) => ExecutionStatus::Error,
        }
    }
}

/// Status recorded in execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
