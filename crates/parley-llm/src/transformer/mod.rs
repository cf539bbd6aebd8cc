pub mod gemini;

pub use gemini::GeminiTransformer;

use futures::Stream;
use parley_core::chat::{ChatChunk, ChatRequest};
use serde_json::Value;
use std::pin::Pin;

use crate::error::{ConversionError, Result};

/// Type alias for LLM stream
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Schema transformer trait for converting between internal and provider formats
pub trait SchemaTransformer: Send + Sync {
    /// Get the provider ID
    fn provider_id(&self) -> &str;

    /// Path (relative to the base URL) of the streaming endpoint for `model`
    fn stream_endpoint(&self, model: &str) -> String;

    /// Header carrying the API key
    fn auth_header(&self, key: &str) -> (String, String);

    /// Transform request to provider-specific format
    fn transform_request(&self, request: &ChatRequest) -> std::result::Result<Value, ConversionError>;

    /// Parse the payload of one SSE event. A payload may carry several chunks
    /// or none at all.
    fn parse_stream_chunk(&self, data: &str) -> Result<Vec<ChatChunk>>;

    /// Extract a human-readable message from an error response body
    fn parse_error_body(&self, body: &str) -> String {
        body.to_string()
    }
}
