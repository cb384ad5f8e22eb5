//! Per-message dispatch pipeline.
//!
//! command shortcut → safety gate → job queue → progress edits →
//! directive post-processing → delivery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{info, warn};

use relaybot_config::{RelayConfig, expand_home};
use relaybot_cron::CronScheduler;
use relaybot_memory::MemoryStore;
use relaybot_runner::{JobQueue, ProcessRunner, PromptBuilder};
use relaybot_storage::{ConversationRow, ExecutionRow, HistoryStorage, Role};
use relaybot_types::{Destination, ExecutionResult, InboundMessage};

use crate::channel::Channel;
use crate::directive::{execute_directives, parse_directives, render_response};
use crate::safety::SafetyGate;

/// Characters of a message copied into the daily log.
const LOG_PREVIEW_CHARS: usize = 100;
/// Characters of successful output kept in execution history.
const HISTORY_OUTPUT_CHARS: usize = 1000;

pub(crate) const EMPTY_RESPONSE: &str = "(empty response)";

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `owner/repo` for chat ids shaped like `owner/repo#123`.
fn repo_of(chat_id: &str) -> Option<&str> {
    let (repo, number) = chat_id.rsplit_once('#')?;
    let (owner, name) = repo.split_once('/')?;
    let valid = !owner.is_empty()
        && !name.is_empty()
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit());
    valid.then_some(repo)
}

/// Routes every inbound message through the pipeline.
pub struct Dispatcher {
    pub(crate) runner: Arc<ProcessRunner>,
    pub(crate) queue: JobQueue,
    pub(crate) scheduler: CronScheduler,
    pub(crate) safety: SafetyGate,
    pub(crate) prompts: Arc<dyn PromptBuilder>,
    pub(crate) storage: Option<Arc<HistoryStorage>>,
    pub(crate) memory: Option<MemoryStore>,
    projects: HashMap<String, String>,
    default_dir: PathBuf,
    /// Directory chosen with `!cd`.
    working_dir: std::sync::Mutex<Option<PathBuf>>,
}

impl Dispatcher {
    pub fn new(
        config: &RelayConfig,
        runner: Arc<ProcessRunner>,
        queue: JobQueue,
        scheduler: CronScheduler,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Self {
        Self {
            runner,
            queue,
            scheduler,
            safety: SafetyGate::new(config.safety.clone()),
            prompts,
            storage: None,
            memory: None,
            projects: config.runner.projects.clone(),
            default_dir: expand_home(&config.runner.working_dir),
            working_dir: std::sync::Mutex::new(None),
        }
    }

    pub fn with_storage(mut self, storage: Arc<HistoryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    fn cd_slot(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.working_dir.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory shown by `!pwd` and used as the base for relative `!cd`.
    pub(crate) fn current_dir(&self) -> PathBuf {
        self.cd_slot().clone().unwrap_or_else(|| self.default_dir.clone())
    }

    pub(crate) fn set_current_dir(&self, dir: PathBuf) {
        *self.cd_slot() = Some(dir);
    }

    /// Project directory for repository chats, else the `!cd` directory.
    fn resolve_working_dir(&self, chat_id: &str) -> Option<PathBuf> {
        if let Some(dir) = repo_of(chat_id).and_then(|repo| self.projects.get(repo)) {
            return Some(expand_home(dir));
        }
        self.cd_slot().clone()
    }

    async fn save_message(&self, role: Role, content: &str, dest: &Destination, timestamp: i64) {
        let Some(storage) = &self.storage else {
            return;
        };
        let row = ConversationRow {
            role,
            content: content.to_string(),
            channel: dest.channel_type.clone(),
            chat_id: dest.chat_id.clone(),
            timestamp,
        };
        if let Err(e) = storage.save_message(&row).await {
            warn!(destination = %dest, "Failed to save message: {e}");
        }
    }

    async fn save_execution(
        &self,
        prompt: &str,
        output: String,
        result: &ExecutionResult,
        dest: &Destination,
        started: Instant,
    ) {
        let Some(storage) = &self.storage else {
            return;
        };
        let row = ExecutionRow {
            prompt: prompt.to_string(),
            output,
            status: result.status(),
            channel: dest.channel_type.clone(),
            chat_id: dest.chat_id.clone(),
            timestamp: now_millis(),
            duration_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(e) = storage.save_execution(&row).await {
            warn!(destination = %dest, "Failed to save execution: {e}");
        }
    }

    fn daily_log(&self, entry: &str) {
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.append_daily_log(entry) {
                warn!("Failed to append daily log: {e}");
            }
        }
    }

    /// Handle one inbound message end to end. Every outcome produces exactly
    /// one final message to the originating destination.
    pub async fn handle(&self, channel: Arc<dyn Channel>, msg: InboundMessage) {
        let text = msg.text.trim();
        if text.is_empty() {
            return;
        }
        let dest = msg.destination();

        self.save_message(Role::User, text, &dest, msg.timestamp).await;
        self.daily_log(&format!(
            "[{}] {}",
            msg.sender_name,
            preview(text, LOG_PREVIEW_CHARS)
        ));

        if let Some(command) = text.strip_prefix('!') {
            let reply = self.run_command(command, &dest).await;
            send(channel.as_ref(), &dest, &reply).await;
            return;
        }

        let verdict = self.safety.check(text);
        if !verdict.safe {
            let approved = self
                .safety
                .request_approval(channel.as_ref(), &dest, text, &verdict.matched_keywords)
                .await;
            if !approved {
                info!(destination = %dest, keywords = ?verdict.matched_keywords, "Request denied");
                send(channel.as_ref(), &dest, "Request denied.").await;
                return;
            }
        }

        let pending_id = match channel.send_text(&dest, "Processing...").await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(destination = %dest, "Failed to send progress message: {e}");
                None
            }
        };

        let prompt = self.prompts.build(text, &dest.chat_id).await;
        let working_dir = self.resolve_working_dir(&dest.chat_id);
        let handle = self.queue.enqueue(prompt, dest.clone(), working_dir).await;
        if handle.position > 1 {
            if let Some(id) = &pending_id {
                let waiting = format!("Waiting in queue... (position {})", handle.position);
                if let Err(e) = channel.edit_message(&dest, id, &waiting).await {
                    warn!(destination = %dest, "Failed to edit progress message: {e}");
                }
            }
        }

        let started = Instant::now();
        let result = handle.wait().await;

        if let Some(err) = &result.error {
            deliver(channel.as_ref(), &dest, pending_id.as_deref(), &format!("Error: {err}")).await;
            self.save_execution(text, err.to_string(), &result, &dest, started)
                .await;
            return;
        }

        let output = if result.output.is_empty() {
            EMPTY_RESPONSE
        } else {
            result.output.as_str()
        };
        let parsed = parse_directives(output);
        let mut response = parsed.cleaned;
        if !parsed.directives.is_empty() {
            let outcomes = execute_directives(&self.scheduler, &parsed.directives, &dest).await;
            response = render_response(&response, &outcomes);
        }
        if response.is_empty() {
            response = EMPTY_RESPONSE.to_string();
        }

        deliver(channel.as_ref(), &dest, pending_id.as_deref(), &response).await;
        self.save_message(Role::Assistant, &response, &dest, now_millis())
            .await;
        self.save_execution(
            text,
            preview(&response, HISTORY_OUTPUT_CHARS),
            &result,
            &dest,
            started,
        )
        .await;
        self.daily_log(&format!(
            "[relaybot] {}",
            preview(&response, LOG_PREVIEW_CHARS)
        ));
    }
}

async fn send(channel: &dyn Channel, dest: &Destination, text: &str) {
    if let Err(e) = channel.send_text(dest, text).await {
        warn!(destination = %dest, "Failed to send message: {e}");
    }
}

/// Replace the progress message with the final text, or post it fresh.
async fn deliver(channel: &dyn Channel, dest: &Destination, pending_id: Option<&str>, text: &str) {
    if let Some(id) = pending_id {
        match channel.edit_message(dest, id, text).await {
            Ok(()) => return,
            Err(e) => warn!(destination = %dest, "Failed to edit message, sending instead: {e}"),
        }
    }
    send(channel, dest, text).await;
}
