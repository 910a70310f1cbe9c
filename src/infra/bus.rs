//! Recipient-keyed publish/subscribe used to reach live connections.
//!
//! Delivery is best effort: nothing is persisted, nothing is acknowledged, and
//! a message published while nobody listens is gone. Clients recover missed
//! messages by querying the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::infra::cache::RedisCache;

/// Payloads published to a channel while the subscription is alive.
/// Dropping the stream unsubscribes.
pub type Subscription = BoxStream<'static, String>;

pub fn user_channel(recipient: Uuid) -> String {
    format!("notifications:user:{}", recipient)
}

#[async_trait]
pub trait FanoutBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    async fn ping(&self) -> Result<()>;
}

/// Cross-process bus on Redis pub/sub. Each subscription holds its own
/// dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBus {
    cache: RedisCache,
}

impl RedisBus {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FanoutBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.cache.connection();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.cache.client().get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(error = ?err, channel = %channel, "dropping undecodable bus message");
                    None
                }
            };
            future::ready(payload)
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.cache.ping().await
    }
}

const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// Single-process bus: one broadcast channel per key. Only connections held
/// by this process can receive what it publishes.
#[derive(Clone)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(LOCAL_CHANNEL_CAPACITY)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Number of channels with at least one live subscriber.
    pub fn active_channels(&self) -> usize {
        match self.channels.lock() {
            Ok(channels) => channels
                .values()
                .filter(|sender| sender.receiver_count() > 0)
                .count(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let sender = {
            let mut channels = self
                .channels
                .lock()
                .map_err(|_| anyhow!("local bus lock poisoned"))?;
            channels.retain(|_, sender| sender.receiver_count() > 0);
            channels.get(channel).cloned()
        };

        if let Some(sender) = sender {
            // A send error only means every receiver went away in between.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let receiver = {
            let mut channels = self
                .channels
                .lock()
                .map_err(|_| anyhow!("local bus lock poisoned"))?;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let payload = match item {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(error = %err, channel = %channel, "local bus subscriber lagged");
                    None
                }
            };
            future::ready(payload)
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
