//! Gateway main structure
//!
//! The WebSocket server that accepts connections and hands each one to a
//! session.

use futures_util::{Sink, SinkExt, StreamExt};
use parley_llm::LLMProvider;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::protocol::{OutboundEvent, CAPACITY_TEXT};
use crate::relay::{RelayConfig, StreamingRelay};
use crate::session::SessionController;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (e.g., "localhost:8080")
    pub bind: String,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    pub relay: RelayConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "localhost:8080".to_string(),
            max_connections: 1000,
            relay: RelayConfig::default(),
        }
    }
}

/// The main Gateway server
#[derive(Clone)]
pub struct Gateway {
    config: GatewayConfig,
    registry: ConnectionRegistry,
    controller: Arc<SessionController>,
    /// One permit per connection slot, held for the life of its task
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("controller", &"<session controller>")
            .field("free_slots", &self.slots.available_permits())
            .finish()
    }
}

impl Gateway {
    /// Create a new Gateway instance
    pub fn new(config: GatewayConfig, generator: Arc<dyn LLMProvider>) -> Self {
        let registry = ConnectionRegistry::new();
        let relay = Arc::new(StreamingRelay::new(registry.clone(), generator, config.relay.clone()));
        let controller = Arc::new(SessionController::new(registry.clone(), relay));

        Self {
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            registry,
            controller,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the connection registry
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Gateway listening on ws://{}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Gateway stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("New connection from {}", peer_addr);

            // The slot is taken before the task is spawned so a burst cannot overshoot
            let slot = match self.slots.clone().try_acquire_owned() {
                Ok(slot) => slot,
                Err(_) => {
                    warn!("Connection limit reached, rejecting {}", peer_addr);
                    tokio::spawn(async move {
                        if let Err(e) = reject_connection(stream, CAPACITY_TEXT).await {
                            debug!("Failed to reject {}: {}", peer_addr, e);
                        }
                    });
                    continue;
                }
            };

            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream, peer_addr, slot).await {
                    error!("Connection error for {}: {}", peer_addr, e);
                }
            });
        }
    }

    /// Stop accepting, end every session and clear the registry
    ///
    /// The registry is cleared first so sessions ending afterwards find
    /// nothing to unregister and broadcast nothing.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Handle a WebSocket connection
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        _slot: OwnedSemaphorePermit,
    ) -> Result<(), GatewayError> {
        let ws_stream = accept_async(stream).await?;
        let (sender, receiver) = ws_stream.split();

        let (connection, rx) = ConnectionHandle::channel(addr);
        let writer = tokio::spawn(write_events(sender, rx, addr));

        tokio::select! {
            session = self.controller.run(connection, receiver) => {
                debug!(
                    "Session for {} closed after {} message(s)",
                    addr, session.messages_relayed
                );
            }
            _ = self.shutdown.cancelled() => {
                debug!("Session for {} ended by shutdown", addr);
            }
        }

        // Every sender is gone now, so the writer flushes and closes the socket
        if let Err(e) = writer.await {
            warn!("Writer task for {} failed: {}", addr, e);
        }
        info!("Connection {} disconnected", addr);
        Ok(())
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gateway({})", self.config.bind)
    }
}

/// Drain a connection's events into its socket
///
/// Returns when every handle is dropped or a write fails; dropping the
/// receiver makes later sends report `Closed`.
async fn write_events<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<OutboundEvent>, addr: SocketAddr)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(event) = rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            debug!("Failed to send to {}: {}", addr, e);
            return;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Failed to close socket for {}: {}", addr, e);
    }
}

/// Reject a connection with a notice
async fn reject_connection(stream: TcpStream, reason: &str) -> Result<(), GatewayError> {
    let ws_stream = accept_async(stream).await?;
    let (mut sender, _) = ws_stream.split();
    let json = serde_json::to_string(&OutboundEvent::system(reason))?;
    sender.send(Message::Text(json)).await?;
    sender.close().await?;
    Ok(())
}

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
