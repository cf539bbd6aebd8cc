//! Scripted generator shared by the gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use parley_core::{ChatChunk, ChatRequest};
use parley_gateway::{ConnectionHandle, OutboundEvent};
use parley_llm::{LLMError, LLMProvider, LLMStream, ProviderCapabilities, ProviderMetadata};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// One step of a scripted reply stream
pub enum Step {
    Fragment(String),
    Usage(u32, u32),
    Fail(String),
    /// Park until the notify fires
    Gate(Arc<Notify>),
}

pub fn fragment(text: &str) -> Step {
    Step::Fragment(text.to_string())
}

enum Script {
    Stream(Vec<Step>),
    CallFails(String),
}

/// Generator that plays back queued scripts, one per request
pub struct ScriptedProvider {
    metadata: ProviderMetadata,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            metadata: ProviderMetadata {
                id: "scripted".to_string(),
                name: "Scripted Provider".to_string(),
                capabilities: ProviderCapabilities::default(),
            },
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a reply stream
    pub fn push(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(Script::Stream(steps));
    }

    /// Queue a reply made of plain fragments
    pub fn push_fragments(&self, fragments: &[&str]) {
        self.push(fragments.iter().map(|text| fragment(text)).collect());
    }

    /// Queue a request that fails before streaming anything
    pub fn push_call_failure(&self, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::CallFails(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Stream items handed out so far
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.metadata.id
    }

    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream, LLMError> {
        self.requests.lock().unwrap().push(request);

        let script = self.scripts.lock().unwrap().pop_front();
        let steps = match script {
            Some(Script::Stream(steps)) => steps,
            Some(Script::CallFails(message)) => return Err(LLMError::Network(message)),
            None => return Err(LLMError::Stream("no scripted reply".to_string())),
        };

        let pulled = self.pulled.clone();
        let stream = stream::unfold(steps.into_iter(), move |mut steps| {
            let pulled = pulled.clone();
            async move {
                loop {
                    let item = match steps.next()? {
                        Step::Gate(gate) => {
                            gate.notified().await;
                            continue;
                        }
                        Step::Fragment(text) => Ok(ChatChunk::content(text)),
                        Step::Usage(input_tokens, output_tokens) => Ok(ChatChunk::Usage {
                            input_tokens,
                            output_tokens,
                        }),
                        Step::Fail(message) => Err(LLMError::Stream(message)),
                    };
                    pulled.fetch_add(1, Ordering::SeqCst);
                    return Some((item, steps));
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn validate(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

pub fn test_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Create a connection and the receiver standing in for its socket
pub fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<OutboundEvent>) {
    ConnectionHandle::channel(test_addr())
}

/// Everything queued on the receiver so far
pub fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Concatenated `stream_content` payloads
pub fn streamed_text(events: &[OutboundEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::StreamContent { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}
