//! Gemini `generateContent` schema
//!
//! Request and streamed-response shapes for the Generative Language API.

use parley_core::chat::{ChatChunk, ChatRequest, FinishReason, GenerationOptions};
use parley_core::types::Turn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SchemaTransformer;
use crate::error::{ConversionError, LLMError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl From<&GenerationOptions> for GeminiGenerationConfig {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            max_output_tokens: options.max_output_tokens,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GeminiStreamResponse {
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GeminiUsage {
    prompt_token_count: u32,
    candidates_token_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiErrorBody {
    code: u16,
    message: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

/// Gemini schema transformer
#[derive(Debug, Clone, Default)]
pub struct GeminiTransformer;

impl GeminiTransformer {
    pub fn new() -> Self {
        Self
    }

    fn content(turn: &Turn) -> GeminiContent<'_> {
        GeminiContent {
            role: turn.role.as_str(),
            parts: vec![GeminiPart { text: &turn.text }],
        }
    }
}

impl SchemaTransformer for GeminiTransformer {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    fn stream_endpoint(&self, model: &str) -> String {
        format!("models/{}:streamGenerateContent?alt=sse", model)
    }

    fn auth_header(&self, key: &str) -> (String, String) {
        ("x-goog-api-key".to_string(), key.to_string())
    }

    fn transform_request(&self, request: &ChatRequest) -> std::result::Result<Value, ConversionError> {
        if request.turns.is_empty() {
            return Err(ConversionError::MissingField("contents".to_string()));
        }

        let body = GeminiRequest {
            contents: request.turns.iter().map(Self::content).collect(),
            system_instruction: request
                .system_instruction
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|text| GeminiSystemInstruction {
                    parts: vec![GeminiPart { text }],
                }),
            generation_config: (&request.options).into(),
        };

        Ok(serde_json::to_value(body)?)
    }

    fn parse_stream_chunk(&self, data: &str) -> Result<Vec<ChatChunk>> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let response: GeminiStreamResponse =
            serde_json::from_str(data).map_err(ConversionError::from)?;

        if let Some(error) = response.error {
            return Err(LLMError::Api {
                status: error.code,
                message: format_error(&error),
            });
        }

        let mut chunks = Vec::new();
        for candidate in response.candidates {
            if let Some(content) = candidate.content {
                chunks.extend(
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .filter(|text| !text.is_empty())
                        .map(ChatChunk::content),
                );
            }
            if let Some(reason) = candidate.finish_reason {
                chunks.push(ChatChunk::finish(FinishReason::parse(&reason)));
            }
        }

        if let Some(usage) = response.usage_metadata {
            chunks.push(ChatChunk::Usage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            });
        }

        Ok(chunks)
    }

    fn parse_error_body(&self, body: &str) -> String {
        // Non-2xx responses may arrive as a bare object or wrapped in an array
        let envelope = serde_json::from_str::<GeminiErrorEnvelope>(body).ok().or_else(|| {
            serde_json::from_str::<Vec<GeminiErrorEnvelope>>(body)
                .ok()
                .and_then(|v| v.into_iter().next())
        });

        match envelope {
            Some(envelope) => format_error(&envelope.error),
            None => body.to_string(),
        }
    }
}

fn format_error(error: &GeminiErrorBody) -> String {
    if error.status.is_empty() {
        error.message.clone()
    } else {
        format!("{} ({})", error.message, error.status)
    }
}
