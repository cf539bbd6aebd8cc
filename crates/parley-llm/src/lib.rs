pub mod error;
pub mod provider;
pub mod providers;
pub mod transformer;

// Re-export core types
pub use error::{ConversionError, LLMError, Result};
pub use provider::{AuthConfig, BaseProvider, LLMProvider, ProviderCapabilities, ProviderConfig, ProviderMetadata};
pub use providers::GeminiProvider;
pub use transformer::{GeminiTransformer, LLMStream, SchemaTransformer};
