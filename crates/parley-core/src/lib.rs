pub mod chat;
pub mod prompt;
pub mod types;

pub use chat::{ChatChunk, ChatRequest, FinishReason, GenerationOptions};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
pub use types::{Role, Turn};
