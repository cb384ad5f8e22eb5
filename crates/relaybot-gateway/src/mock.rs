//! In-memory channel used by the gateway tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use relaybot_config::{RelayConfig, RunnerConfig};
use relaybot_cron::{CronScheduler, CronStore};
use relaybot_memory::MemoryStore;
use relaybot_runner::{JobQueue, PassthroughPrompt, ProcessRunner};
use relaybot_storage::HistoryStorage;
use relaybot_types::{ChannelStatus, Destination, InboundMessage};

use crate::channel::Channel;
use crate::handler::Dispatcher;

/// How a [`MockChannel`] answers confirmations.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Confirm {
    Approve,
    Deny,
    Fail,
    /// Never answers.
    Hang,
}

pub(crate) struct MockChannel {
    kind: String,
    state: AtomicU8, // 0=stopped, 2=running
    confirm: Confirm,
    next_id: AtomicUsize,
    pub sent: Mutex<Vec<(Destination, String)>>,
    pub edits: Mutex<Vec<(String, String)>>,
    pub confirms: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new(kind: &str) -> Self {
        Self::with_confirm(kind, Confirm::Approve)
    }

    pub fn with_confirm(kind: &str, confirm: Confirm) -> Self {
        Self {
            kind: kind.to_string(),
            state: AtomicU8::new(0),
            confirm,
            next_id: AtomicUsize::new(1),
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            confirms: Mutex::new(Vec::new()),
        }
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, t)| t.clone()).collect()
    }

    pub async fn edit_texts(&self) -> Vec<String> {
        self.edits.lock().await.iter().map(|(_, t)| t.clone()).collect()
    }

    /// Latest text of a message, after all edits.
    pub async fn final_text(&self, message_id: &str) -> Option<String> {
        let edits = self.edits.lock().await;
        if let Some((_, text)) = edits.iter().rev().find(|(id, _)| id == message_id) {
            return Some(text.clone());
        }
        let index: usize = message_id.strip_prefix("msg-")?.parse().ok()?;
        self.sent.lock().await.get(index - 1).map(|(_, t)| t.clone())
    }
}

#[async_trait::async_trait]
impl Channel for MockChannel {
    fn channel_type(&self) -> &str {
        &self.kind
    }

    async fn start(&self, _sender: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        self.state.store(2, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.state.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, dest: &Destination, text: &str) -> anyhow::Result<String> {
        self.sent.lock().await.push((dest.clone(), text.to_string()));
        Ok(format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit_message(
        &self,
        _dest: &Destination,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        self.edits
            .lock()
            .await
            .push((message_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_confirm(&self, _dest: &Destination, text: &str) -> anyhow::Result<bool> {
        self.confirms.lock().await.push(text.to_string());
        match self.confirm {
            Confirm::Approve => Ok(true),
            Confirm::Deny => Ok(false),
            Confirm::Fail => anyhow::bail!("confirmation transport failed"),
            Confirm::Hang => std::future::pending().await,
        }
    }

    async fn send_file(&self, _dest: &Destination, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        match self.state.load(Ordering::SeqCst) {
            2 => ChannelStatus::Running,
            _ => ChannelStatus::Stopped,
        }
    }
}

pub(crate) struct Fixture {
    pub dir: tempfile::TempDir,
    pub dispatcher: Dispatcher,
    pub storage: Arc<HistoryStorage>,
}

/// Dispatcher whose external process is `sh -c <message text>`, with storage
/// and memory rooted in a temp dir.
pub(crate) fn fixture(timeout_ms: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RelayConfig::default();
    config.runner = RunnerConfig {
        command: "sh".into(),
        args: vec!["-c".into(), "{prompt}".into()],
        timeout_ms,
        working_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    config.safety.confirm_timeout_ms = 200;

    let runner = Arc::new(ProcessRunner::new(config.runner.clone()));
    let queue = JobQueue::new(runner.clone());
    let scheduler = CronScheduler::new(
        CronStore::new(dir.path().join("crons.json")),
        queue.clone(),
        Arc::new(PassthroughPrompt),
    );
    let storage = Arc::new(HistoryStorage::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(&config, runner, queue, scheduler, Arc::new(PassthroughPrompt))
        .with_storage(storage.clone())
        .with_memory(MemoryStore::new(dir.path()));
    Fixture {
        dir,
        dispatcher,
        storage,
    }
}
