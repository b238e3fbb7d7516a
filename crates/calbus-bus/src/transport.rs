//! In-process channel transport.
//!
//! One `tokio::sync::broadcast` channel per logical [`Channel`]. Publishing is
//! synchronous. Receivers that fall behind the buffer log the number of
//! skipped messages and continue with the oldest retained one; durability is
//! the job of an external transport, not this one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use calbus_core::{
    defaults, logging, Channel, ChannelMessage, ChannelSubscription, ChannelTransport, Delivery,
    Error, Result,
};

/// Configuration for the in-process transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Broadcast buffer size per channel.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::CHANNEL_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CALBUS_CHANNEL_CAPACITY` | `256` | Broadcast buffer per channel |
    pub fn from_env() -> Self {
        let channel_capacity = std::env::var("CALBUS_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::CHANNEL_CAPACITY)
            .max(1);

        Self { channel_capacity }
    }

    /// Set the per-channel buffer size.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Broadcast-backed transport for all logical channels.
pub struct LocalTransport {
    senders: RwLock<HashMap<Channel, broadcast::Sender<ChannelMessage>>>,
    closed: RwLock<HashSet<Channel>>,
    published: HashMap<Channel, AtomicU64>,
    acked: Arc<AtomicU64>,
}

impl LocalTransport {
    /// Create a transport with every channel open.
    pub fn new(config: TransportConfig) -> Self {
        let senders = Channel::ALL
            .iter()
            .map(|&channel| {
                let (tx, _) = broadcast::channel(config.channel_capacity);
                (channel, tx)
            })
            .collect();
        let published = Channel::ALL
            .iter()
            .map(|&channel| (channel, AtomicU64::new(0)))
            .collect();

        Self {
            senders: RwLock::new(senders),
            closed: RwLock::new(HashSet::new()),
            published,
            acked: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Close a channel. Further publishes fail and subscribers see the end of
    /// the stream once buffered messages are drained.
    pub fn close(&self, channel: Channel) {
        if let Ok(mut senders) = self.senders.write() {
            senders.remove(&channel);
        }
        if let Ok(mut closed) = self.closed.write() {
            closed.insert(channel);
        }
        debug!(
            subsystem = logging::SUBSYSTEM_BUS,
            component = logging::COMPONENT_TRANSPORT,
            channel = %channel,
            "Channel closed"
        );
    }

    /// Close every channel.
    pub fn close_all(&self) {
        for channel in Channel::ALL {
            self.close(channel);
        }
    }

    /// Messages successfully published to a channel so far.
    pub fn published_count(&self, channel: Channel) -> u64 {
        self.published
            .get(&channel)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Deliveries acknowledged across all subscriptions.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Current number of subscribers on a channel.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.senders
            .read()
            .ok()
            .and_then(|senders| senders.get(&channel).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    fn sender(&self, channel: Channel) -> Result<broadcast::Sender<ChannelMessage>> {
        let senders = self
            .senders
            .read()
            .map_err(|_| Error::Internal("transport lock poisoned".to_string()))?;
        senders.get(&channel).cloned().ok_or_else(|| Error::Publish {
            channel: channel.to_string(),
            message: "channel is closed".to_string(),
        })
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl ChannelTransport for LocalTransport {
    fn publish(&self, channel: Channel, message: &ChannelMessage) -> Result<()> {
        let tx = self.sender(channel)?;
        let subscriber_count = tx.receiver_count();
        // No subscribers is not an error: the message is simply not retained.
        let _ = tx.send(message.clone());
        if let Some(counter) = self.published.get(&channel) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            subsystem = logging::SUBSYSTEM_BUS,
            component = logging::COMPONENT_TRANSPORT,
            channel = %channel,
            syscode = %message.event.code,
            subscriber_count,
            "Published message"
        );
        Ok(())
    }

    fn subscribe(&self, channel: Channel) -> Result<Box<dyn ChannelSubscription>> {
        let closed = self
            .closed
            .read()
            .map(|closed| closed.contains(&channel))
            .unwrap_or(true);
        if closed {
            return Err(Error::InvalidInput(format!(
                "cannot subscribe to closed channel {}",
                channel
            )));
        }
        let rx = self.sender(channel)?.subscribe();
        Ok(Box::new(LocalSubscription {
            channel,
            rx,
            next_id: 1,
            acked: self.acked.clone(),
        }))
    }
}

/// Subscription handed out by [`LocalTransport`].
pub struct LocalSubscription {
    channel: Channel,
    rx: broadcast::Receiver<ChannelMessage>,
    next_id: u64,
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl ChannelSubscription for LocalSubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    let delivery_id = self.next_id;
                    self.next_id += 1;
                    return Some(Delivery {
                        delivery_id,
                        channel: self.channel,
                        message,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        subsystem = logging::SUBSYSTEM_BUS,
                        component = logging::COMPONENT_TRANSPORT,
                        channel = %self.channel,
                        skipped,
                        "Subscriber lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        if delivery.channel != self.channel {
            return Err(Error::InvalidInput(format!(
                "delivery {} belongs to {}, not {}",
                delivery.delivery_id, delivery.channel, self.channel
            )));
        }
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
