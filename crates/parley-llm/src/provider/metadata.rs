use async_trait::async_trait;
use parley_core::chat::ChatRequest;

use crate::error::Result;
use crate::transformer::LLMStream;

/// LLM Provider trait
///
/// The relay only needs the streaming half: a lazy, finite sequence of chunks
/// that may end with an error at any point.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider ID
    fn provider_id(&self) -> &str;

    /// Get provider metadata
    fn metadata(&self) -> &ProviderMetadata;

    /// Send a chat request and stream the response
    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream>;

    /// Validate the provider configuration
    async fn validate(&self) -> Result<()>;
}

/// Provider metadata
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Provider ID
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Provider capabilities
    pub capabilities: ProviderCapabilities,
}

/// Provider capabilities
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    /// Supports streaming responses
    pub streaming: bool,
    /// Accepts a separate system instruction
    pub system_instruction: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            system_instruction: true,
        }
    }
}
