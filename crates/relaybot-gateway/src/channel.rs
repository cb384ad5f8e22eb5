//! Channel framework for chat platform integrations.
//!
//! # Architecture
//!
//! ```text
//! Chat platform
//!     ↓ (platform-specific protocol)
//! Channel::start() spawns listener
//!     ↓ (InboundMessage via mpsc)
//! ChannelManager → Dispatcher::handle()
//!     ↓ (progress edits, confirmations, final text)
//! Channel::send_text / edit_message / send_confirm
//!     ↓
//! Chat platform
//! ```
//!
//! # Implementing a Channel
//!
//! ```rust,ignore
//! use relaybot_gateway::channel::Channel;
//!
//! struct SlackChannel { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl Channel for SlackChannel {
//!     fn channel_type(&self) -> &str { "slack" }
//!     async fn start(&self, sender: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> { /* ... */ }
//!     async fn send_text(&self, dest: &Destination, text: &str) -> anyhow::Result<String> { /* ... */ }
//!     // ...
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use relaybot_cron::SendCallback;
use relaybot_types::{ChannelStatus, Destination, InboundMessage};

use crate::handler::Dispatcher;

/// A chat platform the bot listens on and replies through.
///
/// All methods take `&self`; implementations use interior mutability for
/// connection state.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Channel type identifier (e.g. "slack", "console"). Unique per manager.
    fn channel_type(&self) -> &str;

    /// Connect and start pushing incoming messages into `sender`.
    async fn start(&self, sender: mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Post a message, returning its platform message id.
    async fn send_text(&self, dest: &Destination, text: &str) -> anyhow::Result<String>;

    /// Replace the text of a previously sent message.
    async fn edit_message(&self, dest: &Destination, message_id: &str, text: &str)
    -> anyhow::Result<()>;

    /// Ask a yes/no question and wait for the answer.
    async fn send_confirm(&self, dest: &Destination, text: &str) -> anyhow::Result<bool>;

    async fn send_file(&self, dest: &Destination, path: &Path) -> anyhow::Result<()>;

    fn status(&self) -> ChannelStatus;
}

/// Registry of channels keyed by channel type, plus the shared inbound queue.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
}

impl ChannelManager {
    /// Create a new channel manager with the given inbound buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self {
            channels: RwLock::new(HashMap::new()),
            inbound_tx: tx,
            inbound_rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Register a channel. Replaces any existing channel of the same type.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let channel_type = channel.channel_type().to_string();
        info!(channel_type = %channel_type, "Registering channel");
        self.channels.write().await.insert(channel_type, channel);
    }

    /// Sender feeding the inbound message loop.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    pub async fn get(&self, channel_type: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(channel_type).cloned()
    }

    /// Start all registered channels.
    pub async fn start_all(&self) {
        let channels = self.channels.read().await;
        for (channel_type, channel) in channels.iter() {
            match channel.start(self.inbound_tx.clone()).await {
                Ok(()) => info!(channel_type = %channel_type, "Channel started"),
                Err(e) => warn!(channel_type = %channel_type, "Failed to start channel: {e}"),
            }
        }
    }

    /// Stop all registered channels.
    pub async fn stop_all(&self) {
        let channels = self.channels.read().await;
        for (channel_type, channel) in channels.iter() {
            if let Err(e) = channel.stop().await {
                warn!(channel_type = %channel_type, "Failed to stop channel: {e}");
            }
        }
    }

    /// Delivery callback for scheduled jobs. The channel is looked up at call
    /// time; output for an unregistered channel type is dropped.
    pub fn send_callback(self: &Arc<Self>) -> SendCallback {
        let manager = self.clone();
        Arc::new(move |channel_type: String, chat_id: String, text: String| {
            let manager = manager.clone();
            async move {
                let Some(channel) = manager.get(&channel_type).await else {
                    debug!(channel_type = %channel_type, "No channel for cron output, dropping");
                    return Ok(());
                };
                channel
                    .send_text(&Destination::new(channel_type, chat_id), &text)
                    .await
                    .map(|_| ())
            }
            .boxed()
        })
    }

    /// Run the inbound message loop, dispatching each message on its own task.
    ///
    /// Should be spawned as a background task; returns once every sender is gone.
    pub async fn run_message_loop(self: &Arc<Self>, dispatcher: Arc<Dispatcher>) {
        let mut rx = self.inbound_rx.lock().await;

        info!("Channel message loop started");

        while let Some(inbound) = rx.recv().await {
            let Some(channel) = self.get(&inbound.channel_type).await else {
                warn!(channel_type = %inbound.channel_type, "Message from unregistered channel dropped");
                continue;
            };
            info!(
                channel_type = %inbound.channel_type,
                chat_id = %inbound.chat_id,
                sender = %inbound.sender_id,
                "Processing inbound message"
            );
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.handle(channel, inbound).await });
        }

        info!("Channel message loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChannel;

    #[tokio::test]
    async fn test_register_and_get() {
        let mgr = ChannelManager::new(16);
        assert!(mgr.get("mock").await.is_none());

        mgr.register(Arc::new(MockChannel::new("mock"))).await;

        let ch = mgr.get("mock").await.unwrap();
        assert_eq!(ch.channel_type(), "mock");
        assert_eq!(ch.status(), ChannelStatus::Stopped);
    }

    #[tokio::test]
    async fn test_register_replaces_same_type() {
        let mgr = ChannelManager::new(16);
        let first = Arc::new(MockChannel::new("mock"));
        let second = Arc::new(MockChannel::new("mock"));
        mgr.register(first.clone()).await;
        mgr.register(second.clone()).await;

        mgr.start_all().await;
        assert_eq!(first.status(), ChannelStatus::Stopped);
        assert_eq!(second.status(), ChannelStatus::Running);
    }

    #[tokio::test]
    async fn test_start_stop_all() {
        let mgr = ChannelManager::new(16);
        let ch = Arc::new(MockChannel::new("mock"));
        mgr.register(ch.clone()).await;

        mgr.start_all().await;
        assert_eq!(ch.status(), ChannelStatus::Running);

        mgr.stop_all().await;
        assert_eq!(ch.status(), ChannelStatus::Stopped);
    }

    #[tokio::test]
    async fn test_send_callback() {
        let mgr = Arc::new(ChannelManager::new(16));
        let ch = Arc::new(MockChannel::new("mock"));
        mgr.register(ch.clone()).await;

        let callback = mgr.send_callback();
        callback("mock".into(), "C1".into(), "[Cron] hi".into())
            .await
            .unwrap();
        // Unknown channel types are dropped, not errors.
        callback("gone".into(), "C1".into(), "[Cron] hi".into())
            .await
            .unwrap();

        assert_eq!(ch.sent_texts().await, vec!["[Cron] hi"]);
        assert_eq!(ch.sent.lock().await[0].0.chat_id, "C1");
    }
}
