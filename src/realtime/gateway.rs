//! Bridges a recipient's bus channel onto one live client connection.
//!
//! Each open connection runs two tasks until its cancellation token fires:
//! a relay that forwards bus messages as `notification` frames, and a ticker
//! that writes keep-alive frames. Closing the transport drops the returned
//! [`ConnectionStream`], which cancels both tasks and deregisters the
//! connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::notification::Notification;
use crate::infra::bus::{user_channel, FanoutBus, Subscription};
use crate::realtime::registry::{Connection, ConnectionRegistry};

pub const CONNECTED_EVENT: &str = "connected";
pub const NOTIFICATION_EVENT: &str = "notification";

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Transport-neutral unit written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Event { event: &'static str, data: String },
    KeepAlive,
}

impl StreamFrame {
    fn connected() -> Self {
        Self::Event {
            event: CONNECTED_EVENT,
            data: json!({ "status": "connected" }).to_string(),
        }
    }

    /// Re-encodes a bus payload as a `notification` frame.
    fn notification(payload: &str) -> serde_json::Result<Self> {
        let notification: Notification = serde_json::from_str(payload)?;
        Ok(Self::Event {
            event: NOTIFICATION_EVENT,
            data: serde_json::to_string(&notification)?,
        })
    }
}

#[derive(Clone)]
pub struct StreamGateway {
    bus: Arc<dyn FanoutBus>,
    registry: Arc<ConnectionRegistry>,
    keepalive_interval: Duration,
    buffer: usize,
}

impl StreamGateway {
    pub fn new(bus: Arc<dyn FanoutBus>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            bus,
            registry,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Opens a stream for an already authenticated recipient.
    ///
    /// The first frame is always the `connected` acknowledgement. Fails only
    /// when the bus subscription cannot be established, in which case nothing
    /// is registered.
    pub async fn open(&self, user_id: Uuid) -> Result<ConnectionStream> {
        let subscription = self.bus.subscribe(&user_channel(user_id)).await?;

        let (sink, receiver) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let connection = Arc::new(Connection::new(user_id, sink, cancel.clone()));
        self.registry.register(connection.clone());

        let guard = ConnectionGuard {
            connection: connection.clone(),
            registry: self.registry.clone(),
        };

        // The receiver is still held here and the buffer is empty, so this
        // only fails if the connection was closed already.
        if connection.send(StreamFrame::connected()).await.is_err() {
            debug!(user_id = %user_id, connection_id = %connection.id(), "connection closed before handshake");
        }

        tokio::spawn(relay_loop(
            connection.clone(),
            self.registry.clone(),
            subscription,
        ));
        tokio::spawn(keepalive_loop(
            connection.clone(),
            self.registry.clone(),
            self.keepalive_interval,
        ));

        info!(
            user_id = %user_id,
            connection_id = %connection.id(),
            connections = self.registry.connections_for(user_id).len(),
            "stream connection opened"
        );

        let frames = ReceiverStream::new(receiver)
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(ConnectionStream { frames, guard })
    }
}

/// Frames for one client. Ends when the connection is cancelled; dropping it
/// closes the connection.
pub struct ConnectionStream {
    frames: BoxStream<'static, StreamFrame>,
    guard: ConnectionGuard,
}

impl ConnectionStream {
    pub fn connection_id(&self) -> Uuid {
        self.guard.connection.id()
    }

    pub fn user_id(&self) -> Uuid {
        self.guard.connection.user_id()
    }

    /// Closes the connection as if the transport had gone away.
    pub fn close(&self) {
        close_connection(&self.guard.registry, &self.guard.connection);
    }
}

impl Stream for ConnectionStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().frames.poll_next_unpin(cx)
    }
}

struct ConnectionGuard {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        close_connection(&self.registry, &self.connection);
    }
}

/// Streaming -> Closed. Safe to call from every exit path.
fn close_connection(registry: &ConnectionRegistry, connection: &Connection) {
    connection.close();
    if registry.deregister(connection.user_id(), connection.id()) {
        info!(
            user_id = %connection.user_id(),
            connection_id = %connection.id(),
            "stream connection closed"
        );
    }
}

async fn relay_loop(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    mut subscription: Subscription,
) {
    let cancel = connection.cancel_token().clone();
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => match next {
                Some(payload) => payload,
                None => {
                    warn!(user_id = %connection.user_id(), connection_id = %connection.id(), "bus subscription ended");
                    break;
                }
            },
        };

        let frame = match StreamFrame::notification(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    error = ?err,
                    user_id = %connection.user_id(),
                    connection_id = %connection.id(),
                    "skipping malformed notification payload"
                );
                continue;
            }
        };

        if connection.send(frame).await.is_err() {
            debug!(connection_id = %connection.id(), "relay write failed");
            break;
        }
    }

    close_connection(&registry, &connection);
}

async fn keepalive_loop(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) {
    let cancel = connection.cancel_token().clone();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if connection.send(StreamFrame::KeepAlive).await.is_err() {
                    debug!(connection_id = %connection.id(), "keep-alive write failed");
                    break;
                }
            }
        }
    }

    close_connection(&registry, &connection);
}
