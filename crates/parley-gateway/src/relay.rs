use futures_util::StreamExt;
use parley_core::{ChatChunk, ChatRequest, GenerationOptions, Role, Turn, DEFAULT_SYSTEM_PROMPT};
use parley_llm::{LLMError, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::protocol::OutboundEvent;

/// How replies are requested and paced
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub system_prompt: String,
    pub options: GenerationOptions,
    /// Model override; empty uses the generator's default
    pub model: String,
    /// Pause before each fragment is forwarded
    pub chunk_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            options: GenerationOptions::default(),
            model: String::new(),
            chunk_delay: Duration::from_millis(10),
        }
    }
}

/// Result of relaying one user message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Blank input, nothing was sent
    Ignored,
    /// Reply streamed and recorded
    Completed,
    /// Generation failed; the client got `stream_end` and an apology
    Recovered,
    /// The connection closed mid-reply and has been unregistered
    Aborted,
}

enum RelayFailure {
    Closed,
    Generator(LLMError),
}

/// Streams generator output to one connection and keeps its history
#[derive(Clone)]
pub struct StreamingRelay {
    registry: ConnectionRegistry,
    generator: Arc<dyn LLMProvider>,
    config: RelayConfig,
}

impl StreamingRelay {
    pub fn new(registry: ConnectionRegistry, generator: Arc<dyn LLMProvider>, config: RelayConfig) -> Self {
        Self {
            registry,
            generator,
            config,
        }
    }

    /// Relay one user message and stream the reply back
    ///
    /// The client sees `stream_start`, the fragments in generator order, then
    /// `stream_end`. The model turn is appended only when the stream
    /// completes; a failed or aborted reply leaves just the user turn behind.
    pub async fn stream_reply(&self, id: &ConnectionId, connection: &ConnectionHandle, user_text: &str) -> RelayOutcome {
        if user_text.trim().is_empty() {
            return RelayOutcome::Ignored;
        }

        let store = self.registry.conversations();
        let mut turns = store.history(id);
        if let Err(e) = store.append_turn(id, Role::User, user_text) {
            warn!(connection_id = %id, "Failed to record user turn: {}", e);
        }
        turns.push(Turn::user(user_text));

        let request = ChatRequest::new(self.config.model.clone())
            .with_system_instruction(self.config.system_prompt.clone())
            .with_turns(turns)
            .with_options(self.config.options.clone());

        if connection.send(OutboundEvent::StreamStart).is_err() {
            return self.abort(id);
        }

        match self.forward(connection, request).await {
            Ok(reply) => {
                if connection.send(OutboundEvent::StreamEnd).is_err() {
                    return self.abort(id);
                }
                info!(connection_id = %id, chars = reply.len(), "Reply streamed");
                if let Err(e) = store.append_turn(id, Role::Model, reply) {
                    warn!(connection_id = %id, "Failed to record model turn: {}", e);
                }
                RelayOutcome::Completed
            }
            Err(RelayFailure::Closed) => self.abort(id),
            Err(RelayFailure::Generator(e)) => {
                error!(connection_id = %id, "Generation failed: {}", e);
                let apology = OutboundEvent::error(format!(
                    "I apologize, but I encountered an error processing your request: {}. Please try again.",
                    e
                ));
                if connection.send(OutboundEvent::StreamEnd).is_err() || connection.send(apology).is_err() {
                    return self.abort(id);
                }
                RelayOutcome::Recovered
            }
        }
    }

    /// Pump fragments to the client, returning the concatenated reply
    async fn forward(&self, connection: &ConnectionHandle, request: ChatRequest) -> Result<String, RelayFailure> {
        let mut stream = self
            .generator
            .chat_stream(request)
            .await
            .map_err(RelayFailure::Generator)?;

        let mut reply = String::new();
        loop {
            // A stalled generator must not outlive the peer
            let chunk = tokio::select! {
                biased;
                _ = connection.closed() => return Err(RelayFailure::Closed),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };

            match chunk.map_err(RelayFailure::Generator)? {
                ChatChunk::Content { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    if !self.config.chunk_delay.is_zero() {
                        tokio::time::sleep(self.config.chunk_delay).await;
                    }
                    connection
                        .send(OutboundEvent::content(text.as_str()))
                        .map_err(|_| RelayFailure::Closed)?;
                    reply.push_str(&text);
                }
                ChatChunk::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    debug!(input_tokens, output_tokens, "Token usage");
                }
                ChatChunk::Finish { reason } => {
                    debug!(%reason, "Generation finished");
                }
            }
        }

        Ok(reply)
    }

    fn abort(&self, id: &ConnectionId) -> RelayOutcome {
        info!(connection_id = %id, "Connection closed during reply");
        self.registry.unregister(id);
        RelayOutcome::Aborted
    }
}
