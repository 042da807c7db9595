use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::kv::KeyValueStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
}

impl StoredMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Rolling per-user chat history in the key-value store. Appends trim to
/// the configured window and refresh the list TTL, so idle conversations
/// age out on their own.
pub struct ConversationMemory {
    kv: Arc<dyn KeyValueStore>,
    window: i64,
    ttl_s: u64,
}

impl ConversationMemory {
    pub fn new(kv: Arc<dyn KeyValueStore>, window: i64, ttl_s: u64) -> Self {
        Self { kv, window, ttl_s }
    }

    pub async fn append(&self, user_id: &str, role: &str, content: &str) -> Result<()> {
        let raw = serde_json::to_string(&StoredMessage::new(role, content))?;
        self.kv
            .list_push(&key_for(user_id), &raw, self.window, self.ttl_s)
            .await
    }

    /// Stored history, oldest first. Entries that fail to parse are
    /// dropped rather than poisoning the whole conversation.
    pub async fn read(&self, user_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = self.kv.list_range(&key_for(user_id)).await?;
        Ok(rows
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }
}

fn key_for(user_id: &str) -> String {
    format!("conversation:{user_id}")
}
