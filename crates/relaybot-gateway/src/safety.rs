//! Keyword gate with a fail-closed human confirmation.

use std::time::Duration;

use tracing::{info, warn};

use relaybot_config::SafetyConfig;
use relaybot_types::Destination;

use crate::channel::Channel;

/// Characters of the request quoted in the confirmation prompt.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub matched_keywords: Vec<String>,
}

pub struct SafetyGate {
    config: SafetyConfig,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Case-insensitive substring match against the configured keywords.
    pub fn check(&self, text: &str) -> SafetyVerdict {
        if !self.config.enabled {
            return SafetyVerdict {
                safe: true,
                matched_keywords: Vec::new(),
            };
        }
        let lower = text.to_lowercase();
        let matched_keywords: Vec<String> = self
            .config
            .keywords
            .iter()
            .filter(|kw| lower.contains(&kw.to_lowercase()))
            .cloned()
            .collect();
        SafetyVerdict {
            safe: matched_keywords.is_empty(),
            matched_keywords,
        }
    }

    /// Ask the requester to confirm. Denies on timeout or channel failure.
    pub async fn request_approval(
        &self,
        channel: &dyn Channel,
        dest: &Destination,
        text: &str,
        matched: &[String],
    ) -> bool {
        let warning = warning_text(text, matched);
        let deadline = Duration::from_millis(self.config.confirm_timeout_ms);

        let approved = match tokio::time::timeout(deadline, channel.send_confirm(dest, &warning)).await
        {
            Ok(Ok(approved)) => approved,
            Ok(Err(e)) => {
                warn!(destination = %dest, "Confirmation failed, denying: {e}");
                false
            }
            Err(_) => {
                warn!(
                    destination = %dest,
                    timeout_ms = self.config.confirm_timeout_ms,
                    "Confirmation timed out, denying"
                );
                false
            }
        };
        info!(destination = %dest, approved, keywords = ?matched, "Safety confirmation resolved");
        approved
    }
}

fn warning_text(text: &str, matched: &[String]) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!(
        "⚠️ Risky request detected: [{}]\nRequest: \"{preview}\"\n\nProceed?",
        matched.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Confirm, MockChannel};

    fn gate(timeout_ms: u64) -> SafetyGate {
        SafetyGate::new(SafetyConfig {
            confirm_timeout_ms: timeout_ms,
            ..Default::default()
        })
    }

    #[test]
    fn test_check_keywords() {
        let gate = gate(1000);
        let verdict = gate.check("please RM the temp dir and push");
        assert!(!verdict.safe);
        assert_eq!(verdict.matched_keywords, vec!["rm", "push"]);

        let verdict = gate.check("summarize the README");
        assert!(verdict.safe);
        assert!(verdict.matched_keywords.is_empty());

        assert!(!gate.check("로그 파일 삭제해줘").safe);
    }

    #[test]
    fn test_disabled_gate_is_always_safe() {
        let gate = SafetyGate::new(SafetyConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(gate.check("rm -rf / && git push --force").safe);
    }

    #[test]
    fn test_warning_text_truncates() {
        let long = "x".repeat(150);
        let warning = warning_text(&long, &["rm".to_string()]);
        assert!(warning.starts_with("⚠️ Risky request detected: [rm]"));
        assert!(warning.contains(&format!("\"{}...\"", "x".repeat(100))));

        let short = warning_text("rm a", &["rm".to_string()]);
        assert!(short.contains("\"rm a\""));
    }

    #[tokio::test]
    async fn test_approval_follows_channel_answer() {
        let dest = Destination::new("mock", "C1");
        let matched = vec!["rm".to_string()];

        let yes = MockChannel::with_confirm("mock", Confirm::Approve);
        assert!(gate(1000).request_approval(&yes, &dest, "rm x", &matched).await);
        assert_eq!(yes.confirms.lock().await.len(), 1);

        let no = MockChannel::with_confirm("mock", Confirm::Deny);
        assert!(!gate(1000).request_approval(&no, &dest, "rm x", &matched).await);
    }

    #[tokio::test]
    async fn test_approval_fails_closed() {
        let dest = Destination::new("mock", "C1");
        let matched = vec!["rm".to_string()];

        let broken = MockChannel::with_confirm("mock", Confirm::Fail);
        assert!(!gate(1000).request_approval(&broken, &dest, "rm x", &matched).await);

        let silent = MockChannel::with_confirm("mock", Confirm::Hang);
        let started = std::time::Instant::now();
        assert!(!gate(50).request_approval(&silent, &dest, "rm x", &matched).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
