use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::types::{TelegramResponse, TelegramUpdate};
use crate::config::TelegramConfig;

/// Outbound messaging surface. The router and background services only see
/// this trait, so tests can capture sent messages without a live bot.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Inbound update feed. The poller only sees this trait, so tests can
/// drive it with scripted batches.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: i64, timeout_s: u64) -> Result<Vec<TelegramUpdate>>;
}

/// Telegram Bot API client over long polling.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, config: &TelegramConfig) -> Self {
        let base = config.api_base.trim_end_matches('/');
        Self {
            http,
            base_url: format!("{}/bot{}", base, config.bot_token),
        }
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn get_updates(&self, offset: i64, timeout_s: u64) -> Result<Vec<TelegramUpdate>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_s,
            "allowed_updates": ["message"],
        });
        let response = self
            .http
            .post(format!("{}/getUpdates", self.base_url))
            // The HTTP timeout must outlive the long-poll window.
            .timeout(Duration::from_secs(timeout_s + 10))
            .json(&body)
            .send()
            .await
            .context("telegram getUpdates request failed")?;
        let parsed: TelegramResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .context("telegram getUpdates returned malformed JSON")?;
        if !parsed.ok {
            return Err(anyhow!(
                "telegram getUpdates rejected: {}",
                parsed.description.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(parsed.result.unwrap_or_default())
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage request failed")?;
        let parsed: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .context("telegram sendMessage returned malformed JSON")?;
        if !parsed.ok {
            return Err(anyhow!(
                "telegram sendMessage rejected: {}",
                parsed.description.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(())
    }
}
