use thiserror::Error;

/// Unified error type for LLM operations
#[derive(Error, Debug)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("transform error: {0}")]
    Transform(#[from] ConversionError),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
}

/// Error during schema transformation
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl LLMError {
    /// Build the error for a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => LLMError::Auth(message),
            429 => LLMError::RateLimited { retry_after: 60 },
            _ => LLMError::Api { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;
