use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::Channel;

/// Append-only text per `(document, channel)`, kept apart from the
/// structural state so high-frequency deltas never touch it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentStore {
    entries: BTreeMap<String, String>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, doc_id: &str, channel: &Channel, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.entries
            .entry(channel.key(doc_id))
            .or_default()
            .push_str(delta);
    }

    /// Full accumulated text; empty when nothing arrived yet.
    pub fn get(&self, doc_id: &str, channel: &Channel) -> &str {
        self.entries
            .get(&channel.key(doc_id))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn channel_count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
