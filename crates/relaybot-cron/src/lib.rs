//! relaybot-cron: Scheduled prompts.
//!
//! Jobs are persisted as a JSON array and each enabled job owns one live
//! trigger task. On every trigger the job's prompt goes through the shared
//! [`relaybot_runner::JobQueue`] like any interactive request, and the result
//! is delivered through the registered [`SendCallback`].

pub mod error;
pub mod schedule;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use relaybot_types::Destination;

pub use error::CronError;
pub use scheduler::CronScheduler;
pub use store::CronStore;

/// A scheduled prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Unique job ID (UUID v4).
    pub id: String,
    /// Cron expression as entered (five or six fields).
    pub schedule: String,
    /// Request text sent on every trigger.
    pub prompt: String,
    pub channel_type: String,
    pub chat_id: String,
    pub enabled: bool,
    /// Creation time (unix millis).
    pub created_at: i64,
}

impl CronJob {
    pub fn destination(&self) -> Destination {
        Destination::new(&self.channel_type, &self.chat_id)
    }

    /// First eight characters of the id, as shown to users.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Delivers cron output: `(channel_type, chat_id, text)`.
pub type SendCallback =
    Arc<dyn Fn(String, String, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
