use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Authentication configuration enum
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// API Key authentication
    ApiKey {
        /// The API key
        key: String,
    },
    /// No authentication
    #[default]
    None,
}

impl AuthConfig {
    /// Create API key auth from environment variable
    pub fn from_env(env_var: &str) -> Option<Self> {
        std::env::var(env_var).ok().map(|key| Self::ApiKey { key })
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey { key } => Some(key),
            Self::None => None,
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider ID
    pub provider_id: String,
    /// Base URL for the API
    pub base_url: String,
    /// Authentication configuration
    #[serde(flatten)]
    pub auth: AuthConfig,
    /// Default model to use
    pub model: String,
    /// Request timeout in seconds, covering the whole streamed body
    #[serde(with = "serde_duration", default = "default_timeout")]
    pub timeout: Duration,
    /// Additional headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    /// Create a new provider config
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Gemini defaults
    pub fn gemini() -> Self {
        Self::default()
    }

    /// Set API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.auth = AuthConfig::ApiKey { key: key.into() };
        self
    }

    /// Set model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: "gemini".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            auth: AuthConfig::None,
            model: GEMINI_DEFAULT_MODEL.to_string(),
            timeout: default_timeout(),
            headers: HashMap::new(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

// Custom serialization for Duration
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
