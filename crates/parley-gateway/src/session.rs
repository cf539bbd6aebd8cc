//! Session management
//!
//! Drives one connection from handshake to close: register, process inbound
//! frames one at a time, unregister. The socket keeps being read while a
//! reply streams so a close from the peer is seen mid-reply.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::{self, Either};
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::ops::ControlFlow;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info_span, warn, Instrument};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::protocol::{ClientMessage, OutboundEvent, INVALID_FORMAT_TEXT};
use crate::relay::{RelayOutcome, StreamingRelay};

/// Lifecycle of a connection's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake done, not yet registered
    Connecting,
    /// Registered and processing messages
    Active,
    /// Unregistered; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session state
#[derive(Debug, Clone)]
pub struct Session {
    id: Option<ConnectionId>,
    state: SessionState,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Messages relayed to the generator
    pub messages_relayed: usize,
}

impl Session {
    fn new() -> Self {
        Self {
            id: None,
            state: SessionState::Connecting,
            created_at: Utc::now(),
            messages_relayed: 0,
        }
    }

    /// Identifier assigned at registration
    pub fn id(&self) -> Option<&ConnectionId> {
        self.id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get session age
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
    }
}

/// Unregisters on drop, so a panicking or cancelled session still cleans up
struct Registration {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Runs sessions against a shared registry and relay
pub struct SessionController {
    registry: ConnectionRegistry,
    relay: Arc<StreamingRelay>,
}

impl SessionController {
    pub fn new(registry: ConnectionRegistry, relay: Arc<StreamingRelay>) -> Self {
        Self { registry, relay }
    }

    /// Run a session until the peer goes away
    ///
    /// Data frames are handled strictly in order: the next one is not
    /// processed until the reply to the previous one has been streamed.
    /// Reading continues in the meantime, and a close frame or read error
    /// marks the connection closed at once so an in-flight reply stops.
    pub async fn run<S, E>(&self, connection: ConnectionHandle, mut incoming: S) -> Session
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let mut session = Session::new();

        let id = self.registry.register(connection.clone());
        let registration = Registration {
            registry: self.registry.clone(),
            id: id.clone(),
        };
        session.id = Some(id.clone());
        session.transition(SessionState::Active);

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let reader_connection = connection.clone();
        let reader = async move {
            while let Some(frame) = incoming.next().await {
                match frame {
                    Ok(Message::Close(_)) => {
                        debug!("Close frame received");
                        reader_connection.close();
                        break;
                    }
                    Ok(frame) => {
                        if frames_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("WebSocket receive error: {}", e);
                        reader_connection.close();
                        break;
                    }
                }
            }
        };

        let processor = async {
            while let Some(frame) = frames_rx.recv().await {
                if connection.is_closed() {
                    break;
                }
                if self.handle_frame(&id, &connection, frame, &mut session).await.is_break() {
                    break;
                }
            }
        };

        let span = info_span!("session", connection_id = %id);
        async {
            // Once the reader is done the queue is closed and the processor drains it
            if let Either::Right(((), processor)) = future::select(pin!(processor), pin!(reader)).await {
                processor.await;
            }
        }
        .instrument(span)
        .await;

        drop(registration);
        session.transition(SessionState::Closed);
        debug!(connection_id = %id, age_ms = session.age().num_milliseconds(), "Session ended");
        session
    }

    async fn handle_frame(
        &self,
        id: &ConnectionId,
        connection: &ConnectionHandle,
        frame: Message,
        session: &mut Session,
    ) -> ControlFlow<()> {
        let raw = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return self.reject(connection, "binary frame is not UTF-8"),
            },
            Message::Close(_) => return ControlFlow::Break(()),
            // Pings are answered by the protocol layer
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return ControlFlow::Continue(()),
        };

        let message: ClientMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => return self.reject(connection, &e.to_string()),
        };

        if message.is_blank() {
            debug!("Ignoring empty message");
            return ControlFlow::Continue(());
        }

        session.messages_relayed += 1;
        match self.relay.stream_reply(id, connection, &message.text).await {
            RelayOutcome::Aborted => ControlFlow::Break(()),
            RelayOutcome::Ignored | RelayOutcome::Completed | RelayOutcome::Recovered => ControlFlow::Continue(()),
        }
    }

    fn reject(&self, connection: &ConnectionHandle, reason: &str) -> ControlFlow<()> {
        warn!("Invalid message received: {}", reason);
        match connection.send(OutboundEvent::system(INVALID_FORMAT_TEXT)) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}
