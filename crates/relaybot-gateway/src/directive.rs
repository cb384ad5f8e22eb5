//! Cron directives embedded in process output.
//!
//! The external process can manage scheduled jobs by emitting HTML comment
//! tags in its answer:
//!
//! ```text
//! <!--CRON_JOB:{"schedule":"0 9 * * *","prompt":"daily report"}-->
//! <!--CRON_REMOVE:{"id":"3f2a9c1e"}-->
//! <!--CRON_LIST-->
//! ```
//!
//! Tags are stripped from the text shown to the user whether or not their
//! payload is valid.

use serde::Deserialize;
use tracing::{debug, warn};

use relaybot_cron::{CronJob, CronScheduler};
use relaybot_types::Destination;

const ADD_TAG: &str = "<!--CRON_JOB:";
const REMOVE_TAG: &str = "<!--CRON_REMOVE:";
const LIST_TAG: &str = "<!--CRON_LIST-->";
const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Add { schedule: String, prompt: String },
    Remove { id: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Adds first, then removes, then at most one list.
    pub directives: Vec<Directive>,
    /// Text with every tag removed.
    pub cleaned: String,
}

#[derive(Deserialize)]
struct AddPayload {
    #[serde(default)]
    schedule: String,
    #[serde(default)]
    prompt: String,
}

#[derive(Deserialize)]
struct RemovePayload {
    #[serde(default)]
    id: String,
}

/// Payload of a `<!--PREFIX...-->` tag starting at the beginning of `rest`.
/// The payload must not span lines.
fn tag_payload<'a>(rest: &'a str, prefix: &str) -> Option<(&'a str, usize)> {
    let body = rest.strip_prefix(prefix)?;
    let end = body.find(COMMENT_CLOSE)?;
    let payload = &body[..end];
    if payload.contains('\n') {
        return None;
    }
    Some((payload, prefix.len() + end + COMMENT_CLOSE.len()))
}

fn parse_add(payload: &str) -> Option<Directive> {
    let p: AddPayload = serde_json::from_str(payload).ok()?;
    if p.schedule.is_empty() || p.prompt.is_empty() {
        return None;
    }
    Some(Directive::Add {
        schedule: p.schedule,
        prompt: p.prompt,
    })
}

fn parse_remove(payload: &str) -> Option<Directive> {
    let p: RemovePayload = serde_json::from_str(payload).ok()?;
    if p.id.is_empty() {
        return None;
    }
    Some(Directive::Remove { id: p.id })
}

/// Collapse runs of three or more newlines into one blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

pub fn parse_directives(text: &str) -> ParsedResponse {
    let mut adds = Vec::new();
    let mut removes = Vec::new();
    let mut list = false;
    let mut kept = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(COMMENT_OPEN) {
        kept.push_str(&rest[..start]);
        rest = &rest[start..];

        if let Some((payload, len)) = tag_payload(rest, ADD_TAG) {
            match parse_add(payload) {
                Some(d) => adds.push(d),
                None => debug!(payload, "Dropping malformed cron add directive"),
            }
            rest = &rest[len..];
        } else if let Some((payload, len)) = tag_payload(rest, REMOVE_TAG) {
            match parse_remove(payload) {
                Some(d) => removes.push(d),
                None => debug!(payload, "Dropping malformed cron remove directive"),
            }
            rest = &rest[len..];
        } else if let Some(after) = rest.strip_prefix(LIST_TAG) {
            list = true;
            rest = after;
        } else {
            kept.push_str(COMMENT_OPEN);
            rest = &rest[COMMENT_OPEN.len()..];
        }
    }
    kept.push_str(rest);

    let mut directives = adds;
    directives.extend(removes);
    if list {
        directives.push(Directive::List);
    }

    ParsedResponse {
        directives,
        cleaned: collapse_blank_lines(&kept).trim().to_string(),
    }
}

/// Result of executing one directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveOutcome {
    pub success: bool,
    pub message: String,
    /// Listing output is always shown to the user.
    pub is_list: bool,
}

impl DirectiveOutcome {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
            is_list: false,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            is_list: false,
        }
    }
}

fn format_job_line(job: &CronJob) -> String {
    let status = if job.enabled { "ON" } else { "OFF" };
    format!(
        "- `{}` | {} | {status} | ID: {}",
        job.schedule,
        job.prompt,
        job.short_id()
    )
}

/// Run each directive independently against the scheduler.
pub async fn execute_directives(
    scheduler: &CronScheduler,
    directives: &[Directive],
    dest: &Destination,
) -> Vec<DirectiveOutcome> {
    let mut outcomes = Vec::with_capacity(directives.len());
    for directive in directives {
        let outcome = match directive {
            Directive::Add { schedule, prompt } => {
                match scheduler.add(schedule, prompt, dest).await {
                    Ok(job) => DirectiveOutcome::ok(format!(
                        "Cron registered: `{}` (ID: {})",
                        job.schedule,
                        job.short_id()
                    )),
                    Err(e) => {
                        warn!(destination = %dest, "Cron directive failed: {e}");
                        DirectiveOutcome::failed(format!("Failed to register cron: {e}"))
                    }
                }
            }
            Directive::Remove { id } => match scheduler.remove(id).await {
                Ok(true) => DirectiveOutcome::ok(format!("Cron removed: {id}")),
                Ok(false) => DirectiveOutcome::failed(format!("Cron not found: {id}")),
                Err(e) => {
                    warn!(destination = %dest, "Cron directive failed: {e}");
                    DirectiveOutcome::failed(format!("Failed to remove cron: {e}"))
                }
            },
            Directive::List => {
                let mut outcome = match scheduler.list().await {
                    Ok(jobs) => {
                        let lines: Vec<String> = jobs
                            .iter()
                            .filter(|j| j.chat_id == dest.chat_id)
                            .map(format_job_line)
                            .collect();
                        if lines.is_empty() {
                            DirectiveOutcome::ok("No cron jobs registered.".to_string())
                        } else {
                            DirectiveOutcome::ok(lines.join("\n"))
                        }
                    }
                    Err(e) => DirectiveOutcome::failed(format!("Failed to list crons: {e}")),
                };
                outcome.is_list = true;
                outcome
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Append failures (as warnings) and listings to the cleaned text.
pub fn render_response(cleaned: &str, outcomes: &[DirectiveOutcome]) -> String {
    let extras: Vec<String> = outcomes
        .iter()
        .filter_map(|o| {
            if !o.success {
                Some(format!("⚠ {}", o.message))
            } else if o.is_list {
                Some(o.message.clone())
            } else {
                None
            }
        })
        .collect();

    match (cleaned.is_empty(), extras.is_empty()) {
        (_, true) => cleaned.to_string(),
        (true, false) => extras.join("\n"),
        (false, false) => format!("{cleaned}\n\n{}", extras.join("\n")),
    }
}
