//! Console channel: stdin lines in, stdout messages out.
//!
//! Every line becomes an inbound message for `console/local`, except while a
//! confirmation is pending, in which case the next line answers it.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use anyhow::bail;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relaybot_gateway::channel::Channel;
use relaybot_types::{ChannelStatus, Destination, InboundMessage};

pub const CHANNEL_TYPE: &str = "console";
pub const CHAT_ID: &str = "local";

type Input = Box<dyn AsyncBufRead + Unpin + Send>;
type PendingConfirm = Arc<Mutex<Option<oneshot::Sender<bool>>>>;

pub struct ConsoleChannel {
    input: std::sync::Mutex<Option<Input>>,
    state: std::sync::Mutex<ConsoleState>,
    pending_confirm: PendingConfirm,
    next_id: AtomicUsize,
}

struct ConsoleState {
    status: ChannelStatus,
    cancel: Option<CancellationToken>,
}

impl ConsoleChannel {
    /// Console reading from the process's stdin.
    pub fn stdin() -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()))
    }

    pub fn with_input(input: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            input: std::sync::Mutex::new(Some(Box::new(input))),
            state: std::sync::Mutex::new(ConsoleState {
                status: ChannelStatus::Stopped,
                cancel: None,
            }),
            pending_confirm: Arc::new(Mutex::new(None)),
            next_id: AtomicUsize::new(1),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

async fn read_loop(
    input: Input,
    sender: mpsc::Sender<InboundMessage>,
    pending_confirm: PendingConfirm,
    cancel: CancellationToken,
) {
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Console input closed");
                break;
            }
            Err(e) => {
                warn!("Console read error: {e}");
                break;
            }
        };

        // An abandoned confirmation (timed out upstream) does not eat the line.
        if let Some(tx) = pending_confirm.lock().await.take() {
            if !tx.is_closed() {
                let _ = tx.send(is_yes(&line));
                continue;
            }
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let now = chrono::Utc::now().timestamp_millis();
        let inbound = InboundMessage {
            id: now.to_string(),
            channel_type: CHANNEL_TYPE.into(),
            chat_id: CHAT_ID.into(),
            sender_id: CHAT_ID.into(),
            sender_name: "you".into(),
            text: text.to_string(),
            thread_id: None,
            timestamp: now,
        };
        if sender.send(inbound).await.is_err() {
            info!("Inbound channel closed, stopping console reader");
            break;
        }
    }
}

#[async_trait::async_trait]
impl Channel for ConsoleChannel {
    fn channel_type(&self) -> &str {
        CHANNEL_TYPE
    }

    async fn start(&self, sender: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let Some(input) = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            bail!("Console input already consumed");
        };

        let cancel = CancellationToken::new();
        tokio::spawn(read_loop(
            input,
            sender,
            self.pending_confirm.clone(),
            cancel.clone(),
        ));

        let mut state = self.state();
        state.cancel = Some(cancel);
        state.status = ChannelStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.status = ChannelStatus::Stopped;
        Ok(())
    }

    async fn send_text(&self, _dest: &Destination, text: &str) -> anyhow::Result<String> {
        let id = format!("out-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        println!("[{id}] {text}");
        Ok(id)
    }

    async fn edit_message(
        &self,
        _dest: &Destination,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        println!("[{message_id}] {text}");
        Ok(())
    }

    async fn send_confirm(&self, _dest: &Destination, text: &str) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        *self.pending_confirm.lock().await = Some(tx);
        println!("{text} [y/N]");
        Ok(rx.await.unwrap_or(false))
    }

    async fn send_file(&self, _dest: &Destination, path: &Path) -> anyhow::Result<()> {
        println!("[file] {}", path.display());
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.state().status.clone()
    }
}
