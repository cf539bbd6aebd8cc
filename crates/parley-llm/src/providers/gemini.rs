use async_trait::async_trait;
use parley_core::chat::ChatRequest;

use crate::error::Result;
use crate::provider::{BaseProvider, LLMProvider, ProviderCapabilities, ProviderConfig, ProviderMetadata};
use crate::transformer::{GeminiTransformer, LLMStream};

/// Google Gemini provider
/// Streams from the Generative Language API (`streamGenerateContent`)
pub struct GeminiProvider {
    base: BaseProvider<GeminiTransformer>,
}

impl GeminiProvider {
    /// Create with custom configuration
    pub fn with_config(config: ProviderConfig) -> Result<Self> {
        let metadata = ProviderMetadata {
            id: config.provider_id.clone(),
            name: "Google Gemini".to_string(),
            capabilities: ProviderCapabilities::default(),
        };

        let base = BaseProvider::new(config, GeminiTransformer::new(), metadata)?;
        Ok(Self { base })
    }

    /// Create a new Gemini provider with API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ProviderConfig::gemini().with_api_key(api_key))
    }

    /// Model requests go to when they carry no override
    pub fn model(&self) -> &str {
        &self.base.config().model
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        self.base.provider_id()
    }

    fn metadata(&self) -> &ProviderMetadata {
        &self.base.metadata
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream> {
        self.base.chat_stream(request).await
    }

    async fn validate(&self) -> Result<()> {
        self.base.validate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LLMError;

    #[test]
    fn test_new_provider() {
        let provider = GeminiProvider::new("test-key").unwrap();
        assert_eq!(provider.provider_id(), "gemini");
        assert_eq!(provider.model(), "gemini-2.0-flash");
        assert!(provider.metadata().capabilities.streaming);
    }

    #[tokio::test]
    async fn test_validate_requires_key() {
        let provider = GeminiProvider::with_config(ProviderConfig::gemini()).unwrap();
        assert!(matches!(provider.validate().await, Err(LLMError::Auth(_))));

        let provider = GeminiProvider::new("test-key").unwrap();
        assert!(provider.validate().await.is_ok());
    }
}
