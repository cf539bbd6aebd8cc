use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{StreamExt, TryStreamExt};
use parley_core::chat::ChatRequest;
use reqwest::{header, Client};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::sync::Arc;
use tracing::debug;

use crate::error::{LLMError, Result};
use crate::provider::{LLMProvider, ProviderConfig, ProviderMetadata};
use crate::transformer::{LLMStream, SchemaTransformer};

/// Base provider implementation
/// Handles common HTTP functionality and delegates schema transformation
pub struct BaseProvider<T: SchemaTransformer> {
    config: ProviderConfig,
    http_client: reqwest_middleware::ClientWithMiddleware,
    transformer: Arc<T>,
    pub metadata: ProviderMetadata,
}

impl<T: SchemaTransformer + 'static> BaseProvider<T> {
    /// Create a new base provider
    pub fn new(config: ProviderConfig, transformer: T, metadata: ProviderMetadata) -> Result<Self> {
        // Create retry policy with exponential backoff
        let retry_policy = ExponentialBackoff::builder()
            .base(2)
            .build_with_max_retries(3);

        // Create client with retry middleware
        let http_client = reqwest_middleware::ClientBuilder::new(
            Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| LLMError::Config(e.to_string()))?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(Self {
            config,
            http_client,
            transformer: Arc::new(transformer),
            metadata,
        })
    }

    /// Get the provider ID
    pub fn provider_id(&self) -> &str {
        self.transformer.provider_id()
    }

    /// Get the config
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Build request headers
    fn build_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        // Add authentication header
        if let Some(key) = self.config.auth.api_key() {
            let (header_name, header_value) = self.transformer.auth_header(key);
            let name = header::HeaderName::from_bytes(header_name.as_bytes())
                .map_err(|e| LLMError::Config(format!("Invalid auth header name: {}", e)))?;
            let value = header::HeaderValue::from_str(&header_value)
                .map_err(|e| LLMError::Config(format!("Invalid auth header value: {}", e)))?;
            headers.insert(name, value);
        }

        // Add custom headers from config
        for (key, value) in &self.config.headers {
            let header_name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| LLMError::Config(format!("Invalid header name: {}", e)))?;
            let header_value = header::HeaderValue::from_str(value)
                .map_err(|e| LLMError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(header_name, header_value);
        }

        Ok(headers)
    }

    /// Send a streaming request
    pub async fn send_stream_request(&self, request: ChatRequest) -> Result<LLMStream> {
        let model = if request.model.is_empty() {
            self.config.model.as_str()
        } else {
            request.model.as_str()
        };

        let body = self.transformer.transform_request(&request)?;
        let headers = self.build_headers()?;

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.transformer.stream_endpoint(model)
        );

        debug!(
            provider = self.provider_id(),
            model,
            turns = request.turns.len(),
            "Starting stream request"
        );

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(
                status.as_u16(),
                self.transformer.parse_error_body(&error_text),
            ));
        }

        let transformer = self.transformer.clone();
        let stream = response
            .bytes_stream()
            .eventsource()
            .map(move |event| match event {
                Ok(event) => transformer.parse_stream_chunk(&event.data),
                Err(e) => Err(LLMError::Stream(e.to_string())),
            })
            .map_ok(|chunks| futures::stream::iter(chunks.into_iter().map(Ok)))
            .try_flatten();

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl<T: SchemaTransformer + 'static> LLMProvider for BaseProvider<T> {
    fn provider_id(&self) -> &str {
        self.provider_id()
    }

    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream> {
        self.send_stream_request(request).await
    }

    async fn validate(&self) -> Result<()> {
        if self.config.auth.api_key().map_or(true, |key| key.trim().is_empty()) {
            return Err(LLMError::Auth(format!(
                "no API key configured for provider '{}'",
                self.provider_id()
            )));
        }
        // Header construction rejects keys that are not valid header values
        let _ = self.build_headers()?;
        Ok(())
    }
}
