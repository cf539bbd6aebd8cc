//! WebSocket connection management
//!
//! Handles connection identity, the per-connection outbound channel and the
//! registry of live connections.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::protocol::{OutboundEvent, WELCOME_TEXT};

/// Opaque, unique identifier of a live connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a WebSocket connection for sending messages
///
/// Events are queued to a writer task that owns the socket sink. Once that
/// task is gone, or the peer has started the close handshake, every send
/// fails with [`ConnectionError::Closed`]. Clones share the closed state.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Client address
    pub addr: SocketAddr,
    sender: mpsc::UnboundedSender<OutboundEvent>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(addr: SocketAddr, sender: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self {
            addr,
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Create a handle together with the receiving end its writer drains
    pub fn channel(addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(addr, sender), receiver)
    }

    /// Send an event to this connection
    pub fn send(&self, event: OutboundEvent) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.sender.send(event).map_err(|_| ConnectionError::Closed)
    }

    /// Mark the connection closed; queued events are still flushed
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}

/// Registry of live connections
///
/// Owns the conversation store so that a connection is registered exactly
/// when it has a history.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    conversations: ConversationStore,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by an existing store
    pub fn with_store(conversations: ConversationStore) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            conversations,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Register a connection, open its history and greet it
    pub fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = loop {
            let candidate = ConnectionId::new();
            if let Entry::Vacant(slot) = self.connections.entry(candidate.clone()) {
                self.conversations.open(&candidate);
                slot.insert(handle.clone());
                break candidate;
            }
        };

        info!(connection_id = %id, addr = %handle.addr, "Client connected");

        if handle.send(OutboundEvent::system(WELCOME_TEXT)).is_err() {
            debug!(connection_id = %id, "Connection closed before welcome was delivered");
        }

        id
    }

    /// Remove a connection, drop its history and tell everyone else
    ///
    /// Returns `false` if the connection was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        if self.connections.remove(id).is_none() {
            return false;
        }
        self.conversations.clear(id);

        info!(connection_id = %id, remaining = self.connections.len(), "Client disconnected");

        let notice = OutboundEvent::system(format!("Client {} has disconnected", id));
        for (peer_id, peer) in self.snapshot() {
            if peer.send(notice.clone()).is_err() {
                debug!(connection_id = %peer_id, "Skipping disconnect notice for closed connection");
            }
        }

        true
    }

    /// Get a connection by ID
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Get current connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Get all connection IDs
    pub fn list_connections(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every connection and history without notifying anyone
    pub fn shutdown(&self) {
        let ids = self.list_connections();
        for id in &ids {
            self.connections.remove(id);
            self.conversations.clear(id);
        }
        info!(closed = ids.len(), "Connection registry cleared");
    }

    // Shard locks must not be held while sending.
    fn snapshot(&self) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
}
