//! `!` chat commands. These answer immediately and never touch the queue.

use chrono::{DateTime, Local};

use relaybot_config::expand_home;
use relaybot_memory::PersonaSection;
use relaybot_types::Destination;

use crate::handler::Dispatcher;

const DEFAULT_HISTORY_ROWS: usize = 10;
const SYSTEM_EXECUTION_ROWS: usize = 5;

const HELP_TEXT: &str = "Relaybot Commands
!cd <path> - Change working directory
!pwd - Show working directory
!status - Show runner status
!history [N] - Show recent conversation
!memory [text] - Show or add long-term memory
!forget - Clear long-term memory
!persona [soul|user|mood <content>] - Show or update persona
!cancel - Cancel the running task
!running - Show running and queued tasks
!cron [add \"<schedule>\" \"<prompt>\" | remove <id> | toggle <id>] - Manage cron jobs
!system - Show system info
!help - Show this help";

const CRON_USAGE: &str = "Usage:
!cron - List cron jobs
!cron add \"<schedule>\" \"<prompt>\"
!cron remove <id>
!cron toggle <id>";

const MEMORY_DISABLED: &str = "Memory is disabled.";
const HISTORY_DISABLED: &str = "History is disabled.";

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn clock(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn items(n: usize) -> String {
    format!("{n} item(s)")
}

/// Parse `"<first>" "<second>"`. The second value runs to the last quote.
fn quoted_pair(args: &str) -> Option<(String, String)> {
    let rest = args.trim().strip_prefix('"')?;
    let (first, rest) = rest.split_once('"')?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let second = rest.trim_end().strip_suffix('"')?;
    if first.trim().is_empty() || second.trim().is_empty() {
        return None;
    }
    Some((first.trim().to_string(), second.trim().to_string()))
}

impl Dispatcher {
    /// Run one command (text after the `!`) and return the reply.
    pub(crate) async fn run_command(&self, text: &str, dest: &Destination) -> String {
        let (name, args) = match text.trim().split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (text.trim(), ""),
        };

        match name.to_lowercase().as_str() {
            "cd" => self.cmd_cd(args),
            "pwd" => self.current_dir().display().to_string(),
            "status" => self.cmd_status().await,
            "history" => self.cmd_history(args, dest).await,
            "memory" => self.cmd_memory(args),
            "forget" => self.cmd_forget(),
            "persona" => self.cmd_persona(args),
            "cancel" => {
                if self.runner.cancel_current() {
                    "Running task cancelled.".to_string()
                } else {
                    "No task is currently running.".to_string()
                }
            }
            "running" => self.cmd_running().await,
            "cron" => self.cmd_cron(args, dest).await,
            "system" => self.cmd_system().await,
            "help" => HELP_TEXT.to_string(),
            _ => format!("Unknown command: {name}\nType !help for available commands"),
        }
    }

    fn cmd_cd(&self, args: &str) -> String {
        if args.is_empty() {
            return "Usage: !cd <path>".to_string();
        }
        let target = self.current_dir().join(expand_home(args));
        match std::fs::canonicalize(&target) {
            Ok(dir) if dir.is_dir() => {
                let reply = format!("-> {}", dir.display());
                self.set_current_dir(dir);
                reply
            }
            _ => format!("Path not found: {args}"),
        }
    }

    async fn cmd_status(&self) -> String {
        let state = if self.runner.is_running() {
            "Running"
        } else {
            "Idle"
        };
        format!(
            "Status: {state}\nQueue: {}\nWorking directory: {}",
            items(self.queue.len().await),
            self.current_dir().display()
        )
    }

    async fn cmd_history(&self, args: &str, dest: &Destination) -> String {
        let Some(storage) = &self.storage else {
            return HISTORY_DISABLED.to_string();
        };
        let limit = args.parse().unwrap_or(DEFAULT_HISTORY_ROWS);
        match storage.recent_conversation(&dest.chat_id, limit).await {
            Ok(rows) if rows.is_empty() => "No conversation history.".to_string(),
            Ok(rows) => rows
                .iter()
                .map(|r| {
                    format!(
                        "[{}] {}: {}",
                        clock(r.timestamp),
                        r.role.as_str(),
                        truncate(&r.content, 100)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Failed to load history: {e}"),
        }
    }

    fn cmd_memory(&self, args: &str) -> String {
        let Some(memory) = &self.memory else {
            return MEMORY_DISABLED.to_string();
        };
        if args.is_empty() {
            return match memory.read_memory() {
                Ok(notes) if notes.trim().is_empty() => "(empty)".to_string(),
                Ok(notes) => notes,
                Err(e) => format!("Failed to read memory: {e}"),
            };
        }
        match memory.append_memory(args) {
            Ok(()) => format!("Memory added: {args}"),
            Err(e) => format!("Failed to add memory: {e}"),
        }
    }

    fn cmd_forget(&self) -> String {
        let Some(memory) = &self.memory else {
            return MEMORY_DISABLED.to_string();
        };
        match memory.clear_memory() {
            Ok(()) => "Memory cleared.".to_string(),
            Err(e) => format!("Failed to clear memory: {e}"),
        }
    }

    fn cmd_persona(&self, args: &str) -> String {
        let Some(memory) = &self.memory else {
            return MEMORY_DISABLED.to_string();
        };
        if args.is_empty() {
            return match memory.load_persona() {
                Ok(p) => format!(
                    "[SOUL]\n{}\n\n[USER]\n{}\n\n[MOOD]\n{}",
                    p.soul, p.user, p.mood
                ),
                Err(e) => format!("Failed to load persona: {e}"),
            };
        }

        let usage = "Usage: !persona <soul|user|mood> <content>";
        let Some((section, content)) = args.split_once(char::is_whitespace) else {
            return usage.to_string();
        };
        let Ok(section) = section.parse::<PersonaSection>() else {
            return usage.to_string();
        };
        match memory.update_persona(section, content.trim()) {
            Ok(()) => format!("{} updated.", section.label()),
            Err(e) => format!("Failed to update persona: {e}"),
        }
    }

    async fn cmd_running(&self) -> String {
        let current = self.queue.current().await;
        let pending = self.queue.pending().await;
        if current.is_none() && pending.is_empty() {
            return "No task is currently running.".to_string();
        }

        let mut lines = Vec::new();
        if let Some(job) = current {
            lines.push(format!("Running: {}", job.id));
        }
        if !pending.is_empty() {
            lines.push(format!("Queue ({}):", items(pending.len())));
            for (i, job) in pending.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, truncate(&job.prompt, 50)));
            }
        }
        lines.join("\n")
    }

    async fn cmd_cron(&self, args: &str, dest: &Destination) -> String {
        let (sub, rest) = match args.split_once(char::is_whitespace) {
            Some((sub, rest)) => (sub, rest.trim()),
            None => (args, ""),
        };

        match sub.to_lowercase().as_str() {
            "" | "list" => match self.scheduler.list().await {
                Ok(jobs) if jobs.is_empty() => "No cron jobs registered.".to_string(),
                Ok(jobs) => jobs
                    .iter()
                    .map(|j| {
                        format!(
                            "{} [{}] {} -> {}",
                            if j.enabled { "ON" } else { "OFF" },
                            j.short_id(),
                            j.schedule,
                            truncate(&j.prompt, 40)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("Failed to list crons: {e}"),
            },
            "add" => {
                let Some((schedule, prompt)) = quoted_pair(rest) else {
                    return CRON_USAGE.to_string();
                };
                match self.scheduler.add(&schedule, &prompt, dest).await {
                    Ok(job) => format!("Cron job added: {} ({})", job.short_id(), job.schedule),
                    Err(e) => format!("Failed to register cron: {e}"),
                }
            }
            "remove" if !rest.is_empty() => match self.scheduler.remove(rest).await {
                Ok(true) => format!("Cron job removed: {rest}"),
                Ok(false) => format!("Not found: {rest}"),
                Err(e) => format!("Failed to remove cron: {e}"),
            },
            "toggle" if !rest.is_empty() => match self.scheduler.toggle(rest).await {
                Ok(Some(job)) => format!(
                    "Cron job {}: {}",
                    if job.enabled { "enabled" } else { "disabled" },
                    job.short_id()
                ),
                Ok(None) => format!("Not found: {rest}"),
                Err(e) => format!("Failed to toggle cron: {e}"),
            },
            _ => CRON_USAGE.to_string(),
        }
    }

    async fn cmd_system(&self) -> String {
        let mut lines = vec![
            "System Info".to_string(),
            format!("Working directory: {}", self.current_dir().display()),
            format!("Runner: {}", if self.runner.is_running() { "Running" } else { "Idle" }),
            format!("Queue: {}", items(self.queue.len().await)),
        ];
        if let Some(storage) = &self.storage {
            match storage.recent_executions(SYSTEM_EXECUTION_ROWS).await {
                Ok(rows) if !rows.is_empty() => {
                    lines.push("Recent executions:".to_string());
                    for row in rows {
                        lines.push(format!(
                            "  [{}] {} ({}ms)",
                            clock(row.timestamp),
                            row.status,
                            row.duration_ms
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => lines.push(format!("Failed to load executions: {e}")),
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relaybot_storage::{ConversationRow, Role};

    use super::*;
    use crate::mock::{MockChannel, fixture};

    fn dest() -> Destination {
        Destination::new("mock", "C1")
    }

    #[test]
    fn test_quoted_pair() {
        assert_eq!(
            quoted_pair(r#""0 9 * * *" "say "hi" twice""#),
            Some(("0 9 * * *".into(), r#"say "hi" twice"#.into()))
        );
        assert_eq!(quoted_pair(r#""* * * * *""#), None);
        assert_eq!(quoted_pair(r#"0 9 * * * "x""#), None);
        assert_eq!(quoted_pair(r#""" "x""#), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[tokio::test]
    async fn test_help_and_unknown() {
        let fx = fixture(5_000);
        let help = fx.dispatcher.run_command("HELP", &dest()).await;
        assert!(help.starts_with("Relaybot Commands"));

        let unknown = fx.dispatcher.run_command("bogus now", &dest()).await;
        assert_eq!(
            unknown,
            "Unknown command: bogus\nType !help for available commands"
        );
    }

    #[tokio::test]
    async fn test_cd_and_pwd() {
        let fx = fixture(5_000);
        let root = std::fs::canonicalize(fx.dir.path()).unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        fx.dispatcher.set_current_dir(root.clone());

        let reply = fx.dispatcher.run_command("cd sub", &dest()).await;
        assert_eq!(reply, format!("-> {}", root.join("sub").display()));
        assert_eq!(
            fx.dispatcher.run_command("pwd", &dest()).await,
            root.join("sub").display().to_string()
        );

        let reply = fx.dispatcher.run_command("cd missing", &dest()).await;
        assert_eq!(reply, "Path not found: missing");
        assert_eq!(fx.dispatcher.current_dir(), root.join("sub"));

        assert_eq!(fx.dispatcher.run_command("cd", &dest()).await, "Usage: !cd <path>");
    }

    #[tokio::test]
    async fn test_cd_applies_to_next_request() {
        let fx = fixture(5_000);
        let root = std::fs::canonicalize(fx.dir.path()).unwrap();
        std::fs::create_dir(root.join("work")).unwrap();
        fx.dispatcher
            .run_command(&format!("cd {}", root.join("work").display()), &dest())
            .await;

        let channel = Arc::new(MockChannel::new("mock"));
        let msg = relaybot_types::InboundMessage {
            id: "1".into(),
            channel_type: "mock".into(),
            chat_id: "C1".into(),
            sender_id: "U1".into(),
            sender_name: "alice".into(),
            text: "pwd".into(),
            thread_id: None,
            timestamp: 0,
        };
        fx.dispatcher.handle(channel.clone(), msg).await;
        assert_eq!(
            channel.final_text("msg-1").await,
            Some(root.join("work").display().to_string())
        );
    }

    #[tokio::test]
    async fn test_status_idle() {
        let fx = fixture(5_000);
        let status = fx.dispatcher.run_command("status", &dest()).await;
        assert!(status.starts_with("Status: Idle\nQueue: 0 item(s)\nWorking directory: "));
    }

    #[tokio::test]
    async fn test_memory_commands() {
        let fx = fixture(5_000);
        let d = dest();
        assert_eq!(fx.dispatcher.run_command("memory", &d).await, "(empty)");
        assert_eq!(
            fx.dispatcher.run_command("memory likes rust", &d).await,
            "Memory added: likes rust"
        );
        assert_eq!(fx.dispatcher.run_command("memory", &d).await, "likes rust");
        assert_eq!(fx.dispatcher.run_command("forget", &d).await, "Memory cleared.");
        assert_eq!(fx.dispatcher.run_command("memory", &d).await, "(empty)");
    }

    #[tokio::test]
    async fn test_persona_commands() {
        let fx = fixture(5_000);
        let d = dest();
        assert_eq!(
            fx.dispatcher.run_command("persona mood cheerful today", &d).await,
            "MOOD updated."
        );
        let view = fx.dispatcher.run_command("persona", &d).await;
        assert!(view.starts_with("[SOUL]\n"));
        assert!(view.ends_with("[MOOD]\ncheerful today"));

        let usage = "Usage: !persona <soul|user|mood> <content>";
        assert_eq!(fx.dispatcher.run_command("persona mood", &d).await, usage);
        assert_eq!(fx.dispatcher.run_command("persona spirit x", &d).await, usage);
    }

    #[tokio::test]
    async fn test_history_command() {
        let fx = fixture(5_000);
        assert_eq!(
            fx.dispatcher.run_command("history", &dest()).await,
            "No conversation history."
        );

        for content in ["first", "second", "third"] {
            fx.storage
                .save_message(&ConversationRow {
                    role: Role::User,
                    content: content.into(),
                    channel: "mock".into(),
                    chat_id: "C1".into(),
                    timestamp: 0,
                })
                .await
                .unwrap();
        }
        let history = fx.dispatcher.run_command("history 2", &dest()).await;
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] user: second"));
        assert!(lines[1].ends_with("] user: third"));
    }

    #[tokio::test]
    async fn test_cancel_and_running_when_idle() {
        let fx = fixture(5_000);
        assert_eq!(
            fx.dispatcher.run_command("cancel", &dest()).await,
            "No task is currently running."
        );
        assert_eq!(
            fx.dispatcher.run_command("running", &dest()).await,
            "No task is currently running."
        );
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let fx = Arc::new(fixture(10_000));
        let channel = Arc::new(MockChannel::new("mock"));
        let msg = relaybot_types::InboundMessage {
            id: "1".into(),
            channel_type: "mock".into(),
            chat_id: "C1".into(),
            sender_id: "U1".into(),
            sender_name: "alice".into(),
            text: "sleep 5".into(),
            thread_id: None,
            timestamp: 0,
        };
        let task = {
            let fx = fx.clone();
            let channel = channel.clone();
            tokio::spawn(async move { fx.dispatcher.handle(channel, msg).await })
        };
        while !fx.dispatcher.runner.is_running() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let running = fx.dispatcher.run_command("running", &dest()).await;
        assert!(running.starts_with("Running: "));
        assert_eq!(
            fx.dispatcher.run_command("cancel", &dest()).await,
            "Running task cancelled."
        );
        task.await.unwrap();
        assert_eq!(channel.final_text("msg-1").await.as_deref(), Some("Error: Cancelled"));
    }

    #[tokio::test]
    async fn test_cron_commands() {
        let fx = fixture(5_000);
        let d = dest();
        assert_eq!(
            fx.dispatcher.run_command("cron", &d).await,
            "No cron jobs registered."
        );

        let added = fx
            .dispatcher
            .run_command(r#"cron add "0 9 * * *" "daily report""#, &d)
            .await;
        assert!(added.starts_with("Cron job added: "));
        assert!(added.ends_with(" (0 9 * * *)"));

        let jobs = fx.dispatcher.scheduler.list().await.unwrap();
        let id = jobs[0].short_id().to_string();
        assert_eq!(
            fx.dispatcher.run_command("cron list", &d).await,
            format!("ON [{id}] 0 9 * * * -> daily report")
        );
        assert_eq!(
            fx.dispatcher.run_command(&format!("cron toggle {id}"), &d).await,
            format!("Cron job disabled: {id}")
        );
        assert_eq!(
            fx.dispatcher.run_command(&format!("cron remove {id}"), &d).await,
            format!("Cron job removed: {id}")
        );
        assert_eq!(
            fx.dispatcher.run_command("cron remove nope", &d).await,
            "Not found: nope"
        );

        let failed = fx
            .dispatcher
            .run_command(r#"cron add "not a schedule" "x""#, &d)
            .await;
        assert!(failed.starts_with("Failed to register cron: "));
        assert_eq!(fx.dispatcher.run_command("cron add", &d).await, CRON_USAGE);
        assert_eq!(fx.dispatcher.run_command("cron remove", &d).await, CRON_USAGE);
        fx.dispatcher.scheduler.stop_all().await;
    }

    #[tokio::test]
    async fn test_system_lists_executions() {
        let fx = fixture(5_000);
        let channel = Arc::new(MockChannel::new("mock"));
        let msg = relaybot_types::InboundMessage {
            id: "1".into(),
            channel_type: "mock".into(),
            chat_id: "C1".into(),
            sender_id: "U1".into(),
            sender_name: "alice".into(),
            text: "echo hi".into(),
            thread_id: None,
            timestamp: 0,
        };
        fx.dispatcher.handle(channel, msg).await;

        let system = fx.dispatcher.run_command("system", &dest()).await;
        assert!(system.starts_with("System Info\n"));
        assert!(system.contains("Recent executions:\n  ["));
        assert!(system.contains("] success ("));
    }

    #[tokio::test]
    async fn test_disabled_memory_and_history() {
        let fx = fixture(5_000);
        let mut dispatcher = fx.dispatcher;
        dispatcher.memory = None;
        dispatcher.storage = None;
        assert_eq!(dispatcher.run_command("memory", &dest()).await, MEMORY_DISABLED);
        assert_eq!(dispatcher.run_command("forget", &dest()).await, MEMORY_DISABLED);
        assert_eq!(dispatcher.run_command("persona", &dest()).await, MEMORY_DISABLED);
        assert_eq!(dispatcher.run_command("history", &dest()).await, HISTORY_DISABLED);
    }
}
