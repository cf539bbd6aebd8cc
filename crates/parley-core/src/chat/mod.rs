pub mod chunk;
pub mod request;

pub use chunk::{ChatChunk, FinishReason};
pub use request::{ChatRequest, GenerationOptions};
