use serde::{Deserialize, Serialize};

use crate::types::Turn;

/// Generation request handed to a provider
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model override; providers fall back to their configured model when empty
    pub model: String,
    pub system_instruction: Option<String>,
    /// Full conversation, ending with the newest user turn
    pub turns: Vec<Turn>,
    pub options: GenerationOptions,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Set the system instruction
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Add a turn to the request
    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    /// Add multiple turns
    pub fn with_turns(mut self, turns: Vec<Turn>) -> Self {
        self.turns.extend(turns);
        self
    }

    /// Set options
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Decoding configuration sent with every generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}
