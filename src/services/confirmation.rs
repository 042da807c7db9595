use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kv::KeyValueStore;

/// A tool call parked until the user echoes back the nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingConfirmation {
    pub nonce: String,
    pub tool: String,
    pub payload: Value,
}

/// Stores at most one pending confirmation per user, keyed `confirm:{user}`.
/// The nonce is a fresh 6-digit code; an unanswered confirmation simply
/// expires with the key.
pub struct ConfirmationService {
    kv: Arc<dyn KeyValueStore>,
    ttl_s: u64,
}

impl ConfirmationService {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_s: u64) -> Self {
        Self { kv, ttl_s }
    }

    pub async fn create(
        &self,
        user_id: &str,
        tool: &str,
        payload: Value,
    ) -> Result<PendingConfirmation> {
        let nonce = rand::thread_rng().gen_range(100_000..1_000_000).to_string();
        let pending = PendingConfirmation {
            nonce,
            tool: tool.to_string(),
            payload,
        };
        let raw = serde_json::to_string(&pending)?;
        self.kv.set(&key_for(user_id), &raw, Some(self.ttl_s)).await?;
        Ok(pending)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<PendingConfirmation>> {
        let raw = self.kv.get(&key_for(user_id)).await?;
        match raw {
            Some(raw) => {
                let pending = serde_json::from_str(&raw)
                    .context("stored confirmation is not valid JSON")?;
                Ok(Some(pending))
            }
            None => Ok(None),
        }
    }

    pub async fn consume(&self, user_id: &str) -> Result<()> {
        self.kv.delete(&key_for(user_id)).await
    }
}

fn key_for(user_id: &str) -> String {
    format!("confirm:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn nonce_is_six_digits_and_round_trips() {
        let kv = Arc::new(MemoryKv::new());
        let service = ConfirmationService::new(kv, 300);
        let pending = service
            .create("u1", "calendar_write_create", serde_json::json!({"title": "standup"}))
            .await
            .unwrap();
        assert_eq!(pending.nonce.len(), 6);
        assert!(pending.nonce.chars().all(|c| c.is_ascii_digit()));

        let stored = service.get("u1").await.unwrap().unwrap();
        assert_eq!(stored, pending);

        service.consume("u1").await.unwrap();
        assert!(service.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_confirmation_disappears() {
        let kv = Arc::new(MemoryKv::new());
        let service = ConfirmationService::new(kv.clone(), 300);
        service
            .create("u1", "calendar_write_create", serde_json::json!({}))
            .await
            .unwrap();
        kv.expire_now("confirm:u1");
        assert!(service.get("u1").await.unwrap().is_none());
    }
}
