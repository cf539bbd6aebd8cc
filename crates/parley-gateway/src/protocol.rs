//! WebSocket protocol definitions
//!
//! Defines the message types for client-gateway communication.

use serde::{Deserialize, Serialize};

pub(crate) const WELCOME_TEXT: &str = "Connected to chat server. How can I help you today?";
pub(crate) const INVALID_FORMAT_TEXT: &str = "Invalid message format received. Please try again.";
pub(crate) const CAPACITY_TEXT: &str = "Server at capacity";

/// Envelope sent from client to gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message text; a missing field reads as empty and is ignored
    #[serde(default)]
    pub text: String,
}

impl ClientMessage {
    /// Whether there is anything to relay
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Events sent from gateway to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Server notice (welcome, disconnect, malformed input)
    System {
        text: String,
        /// Always null; the client stamps messages on arrival
        timestamp: Option<String>,
    },
    /// A streamed reply begins
    StreamStart,
    /// One fragment of the streamed reply
    StreamContent { content: String },
    /// The streamed reply is over
    StreamEnd,
    /// Apology shown after a failed generation, rendered as a model message
    #[serde(rename = "received")]
    Error {
        text: String,
        timestamp: Option<String>,
        #[serde(rename = "isAI")]
        is_ai: bool,
    },
}

impl OutboundEvent {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::StreamContent {
            content: content.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error {
            text: text.into(),
            timestamp: None,
            is_ai: true,
        }
    }

    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::StreamStart => "stream_start",
            Self::StreamContent { .. } => "stream_content",
            Self::StreamEnd => "stream_end",
            Self::Error { .. } => "received",
        }
    }
}
