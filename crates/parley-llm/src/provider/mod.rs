pub mod base;
pub mod config;
pub mod metadata;

pub use base::BaseProvider;
pub use config::{AuthConfig, ProviderConfig};
pub use metadata::{LLMProvider, ProviderCapabilities, ProviderMetadata};
