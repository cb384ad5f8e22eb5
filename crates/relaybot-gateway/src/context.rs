//! Prompt assembly from persona, memory, and recent conversation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use relaybot_memory::MemoryStore;
use relaybot_runner::PromptBuilder;
use relaybot_storage::{HistoryStorage, Role};

/// Builds prompts of the form
///
/// ```text
/// [SOUL] ... [USER INFO] ... [MOOD] ... [MEMORY] ...
/// [CONVERSATION HISTORY] ...
/// [CURRENT MESSAGE]
/// User: <text>
/// ```
///
/// Sections are separated by blank lines; empty or unavailable ones are left out.
pub struct ContextPromptBuilder {
    memory: Option<MemoryStore>,
    storage: Option<Arc<HistoryStorage>>,
    history_limit: usize,
}

impl ContextPromptBuilder {
    pub fn new(
        memory: Option<MemoryStore>,
        storage: Option<Arc<HistoryStorage>>,
        history_limit: usize,
    ) -> Self {
        Self {
            memory,
            storage,
            history_limit,
        }
    }

    fn memory_sections(&self, parts: &mut Vec<String>) {
        let Some(memory) = &self.memory else {
            return;
        };
        match memory.load_persona() {
            Ok(persona) => {
                push_section(parts, "SOUL", &persona.soul);
                push_section(parts, "USER INFO", &persona.user);
                push_section(parts, "MOOD", &persona.mood);
            }
            Err(e) => warn!("Failed to load persona: {e}"),
        }
        match memory.read_memory() {
            Ok(notes) => push_section(parts, "MEMORY", &notes),
            Err(e) => warn!("Failed to read memory: {e}"),
        }
    }

    async fn history_section(&self, chat_id: &str, parts: &mut Vec<String>) {
        let Some(storage) = &self.storage else {
            return;
        };
        if self.history_limit == 0 {
            return;
        }
        match storage.recent_conversation(chat_id, self.history_limit).await {
            Ok(rows) => {
                let history: Vec<String> = rows
                    .iter()
                    .map(|r| {
                        let who = match r.role {
                            Role::User => "User",
                            Role::Assistant => "Assistant",
                        };
                        format!("{who}: {}", r.content)
                    })
                    .collect();
                push_section(parts, "CONVERSATION HISTORY", &history.join("\n"));
            }
            Err(e) => warn!(chat_id, "Failed to load conversation history: {e}"),
        }
    }
}

fn push_section(parts: &mut Vec<String>, title: &str, body: &str) {
    if !body.trim().is_empty() {
        parts.push(format!("[{title}]\n{body}"));
    }
}

#[async_trait]
impl PromptBuilder for ContextPromptBuilder {
    async fn build(&self, user_text: &str, chat_id: &str) -> String {
        let mut parts = Vec::new();
        self.memory_sections(&mut parts);
        self.history_section(chat_id, &mut parts).await;
        parts.push(format!("[CURRENT MESSAGE]\nUser: {user_text}"));
        parts.join("\n\n")
    }
}
