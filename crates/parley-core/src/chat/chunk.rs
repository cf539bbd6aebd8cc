/// Chat stream chunk
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Text content delta
    Content { text: String },
    /// Usage information
    Usage { input_tokens: u32, output_tokens: u32 },
    /// Stream finished
    Finish { reason: FinishReason },
}

impl ChatChunk {
    /// Create a content chunk
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    /// Create a finish chunk
    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason }
    }
}

/// Reason for finishing the generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Completed naturally
    Stop,
    /// Hit token limit
    Length,
    /// Blocked by the backend's safety filters
    Safety,
    Other,
}

impl FinishReason {
    /// Convert from a provider finish reason string
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "STOP" => Self::Stop,
            "MAX_TOKENS" | "LENGTH" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => Self::Safety,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::Safety => "safety",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
