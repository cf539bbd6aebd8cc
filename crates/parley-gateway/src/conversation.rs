use dashmap::DashMap;
use parley_core::{Role, Turn};
use std::sync::Arc;

use crate::connection::ConnectionId;

/// Per-connection conversation history, in memory only
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    histories: Arc<DashMap<ConnectionId, Vec<Turn>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty history, discarding any previous one for `id`
    pub fn open(&self, id: &ConnectionId) {
        self.histories.insert(id.clone(), Vec::new());
    }

    /// Append a turn to an open history
    pub fn append_turn(&self, id: &ConnectionId, role: Role, text: impl Into<String>) -> Result<(), StoreError> {
        let mut history = self
            .histories
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownConnection(id.to_string()))?;
        history.push(Turn::new(role, text));
        Ok(())
    }

    /// Turns in insertion order; empty when `id` has no history
    pub fn history(&self, id: &ConnectionId) -> Vec<Turn> {
        self.histories
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Remove the history entirely
    pub fn clear(&self, id: &ConnectionId) -> bool {
        self.histories.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.histories.contains_key(id)
    }

    /// Number of open histories
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No conversation open for connection {0}")]
    UnknownConnection(String),
}
