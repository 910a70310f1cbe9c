use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::realtime::gateway::StreamFrame;

/// The connection's sink is gone or its token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed;

/// One open stream to one client. Never reused after it closes.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    user_id: Uuid,
    sink: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
    alive: AtomicBool,
}

impl Connection {
    pub fn new(user_id: Uuid, sink: mpsc::Sender<StreamFrame>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sink,
            cancel,
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queues a frame for the client, waiting for buffer space unless the
    /// connection is cancelled first. A failed write marks the connection dead.
    pub async fn send(&self, frame: StreamFrame) -> Result<(), ConnectionClosed> {
        if !self.is_alive() {
            return Err(ConnectionClosed);
        }
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectionClosed),
            sent = self.sink.send(frame) => sent.map_err(|_| ConnectionClosed),
        };
        if result.is_err() {
            self.alive.store(false, Ordering::Release);
        }
        result
    }

    /// Marks the connection dead and wakes everything waiting on it.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

/// Process-local index of open connections by recipient.
///
/// The lock is only held for map edits and snapshot copies, never across a
/// write to a connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, Vec<Arc<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Arc<Connection>>>> {
        // Every critical section leaves the map consistent, so a panic in
        // another holder does not invalidate it.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, connection: Arc<Connection>) {
        self.lock()
            .entry(connection.user_id())
            .or_default()
            .push(connection);
    }

    /// Removes one connection. Removing a connection that is already gone is
    /// a no-op; returns whether anything was removed.
    pub fn deregister(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut connections = self.lock();
        let Some(list) = connections.get_mut(&user_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|conn| conn.id() != connection_id);
        let removed = list.len() != before;
        if list.is_empty() {
            connections.remove(&user_id);
        }
        removed
    }

    /// Copy of the recipient's current connections.
    pub fn connections_for(&self, user_id: Uuid) -> Vec<Arc<Connection>> {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn recipient_count(&self) -> usize {
        self.lock().len()
    }

    /// Cancels every open connection. Each one deregisters itself as its
    /// loops wind down. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<Arc<Connection>> = self.lock().values().flatten().cloned().collect();
        for connection in &snapshot {
            connection.close();
        }
        snapshot.len()
    }
}
