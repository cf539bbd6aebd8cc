//! Parley Gateway - WebSocket relay between chat clients and a streaming LLM
//!
//! Each connection gets its own session task: inbound `{"text": ...}`
//! envelopes are relayed to the generator and the reply is streamed back as
//! `stream_start` / `stream_content`* / `stream_end` events.

mod connection;
mod conversation;
mod gateway;
mod protocol;
mod relay;
mod session;

pub use connection::{ConnectionError, ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use conversation::{ConversationStore, StoreError};
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use protocol::{ClientMessage, OutboundEvent};
pub use relay::{RelayConfig, RelayOutcome, StreamingRelay};
pub use session::{Session, SessionController, SessionState};
