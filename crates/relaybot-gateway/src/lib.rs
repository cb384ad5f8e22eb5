//! relaybot-gateway: channels, safety gate, directives, and the dispatch pipeline.
//!
//! Provides:
//! - Channel trait and manager with the inbound message loop
//! - Per-message pipeline (commands, safety, queue, progress edits, delivery)
//! - Cron directives embedded in process output
//! - Prompt assembly from persona, memory, and history
//! - `Gateway` wiring of all of the above from a `RelayConfig`

pub mod channel;
pub mod commands;
pub mod context;
pub mod directive;
pub mod handler;
pub mod safety;

#[cfg(test)]
mod mock;

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use relaybot_config::{RelayConfig, ensure_dir};
use relaybot_cron::{CronScheduler, CronStore};
use relaybot_memory::MemoryStore;
use relaybot_runner::{JobQueue, ProcessRunner};
use relaybot_storage::HistoryStorage;

use channel::{Channel, ChannelManager};
use context::ContextPromptBuilder;
use handler::Dispatcher;

const INBOUND_BUFFER: usize = 256;

/// The assembled bot: one runner, one queue, one scheduler, many channels.
pub struct Gateway {
    channels: Arc<ChannelManager>,
    dispatcher: Arc<Dispatcher>,
    runner: Arc<ProcessRunner>,
    scheduler: CronScheduler,
    scheduler_enabled: bool,
    message_loop: Option<JoinHandle<()>>,
}

impl Gateway {
    pub fn new(config: RelayConfig) -> anyhow::Result<Self> {
        let data_dir = config
            .resolve_data_dir()
            .context("Failed to resolve data directory")?;
        ensure_dir(&data_dir).context("Failed to create data directory")?;

        let db_path = data_dir.join("relaybot.db");
        let storage = match HistoryStorage::open(&db_path) {
            Ok(s) => {
                info!("Storage initialized: {}", db_path.display());
                Some(Arc::new(s))
            }
            Err(e) => {
                warn!("Failed to open storage, running without history: {e}");
                None
            }
        };

        let memory = config.memory.enabled.then(|| MemoryStore::new(&data_dir));
        if let Some(memory) = &memory {
            match memory.clean_old_logs(config.memory.log_retention_days) {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "Cleaned old daily logs"),
                Err(e) => warn!("Failed to clean old daily logs: {e}"),
            }
        }

        let runner = Arc::new(ProcessRunner::new(config.runner.clone()));
        let queue = JobQueue::new(runner.clone());
        let prompts = Arc::new(ContextPromptBuilder::new(
            memory.clone(),
            storage.clone(),
            config.memory.history_limit,
        ));
        let store_path = config
            .cron_store_path()
            .context("Failed to resolve cron store path")?;
        let scheduler = CronScheduler::new(CronStore::new(store_path), queue.clone(), prompts.clone());

        let mut dispatcher = Dispatcher::new(&config, runner.clone(), queue, scheduler.clone(), prompts);
        if let Some(storage) = storage {
            dispatcher = dispatcher.with_storage(storage);
        }
        if let Some(memory) = memory {
            dispatcher = dispatcher.with_memory(memory);
        }

        Ok(Self {
            channels: Arc::new(ChannelManager::new(INBOUND_BUFFER)),
            dispatcher: Arc::new(dispatcher),
            runner,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
            message_loop: None,
        })
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    pub async fn register_channel(&self, channel: Arc<dyn Channel>) {
        self.channels.register(channel).await;
    }

    /// Start cron triggers, channels, and the inbound message loop.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.scheduler
            .set_send_callback(self.channels.send_callback())
            .await;

        if self.scheduler_enabled {
            let started = self
                .scheduler
                .start_all()
                .await
                .context("Failed to start cron jobs")?;
            info!(jobs = started, "Cron scheduler started");
        } else {
            info!("Cron scheduler disabled");
        }

        self.channels.start_all().await;

        let channels = self.channels.clone();
        let dispatcher = self.dispatcher.clone();
        self.message_loop = Some(tokio::spawn(async move {
            channels.run_message_loop(dispatcher).await;
        }));
        info!("Gateway started");
        Ok(())
    }

    /// Cancel the running process, stop cron triggers and channels.
    pub async fn shutdown(&mut self) {
        if self.runner.cancel_current() {
            info!("Cancelled running process on shutdown");
        }
        self.scheduler.stop_all().await;
        self.channels.stop_all().await;
        if let Some(handle) = self.message_loop.take() {
            handle.abort();
        }
        info!("Gateway stopped");
    }
}
