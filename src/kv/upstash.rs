use crate::kv::KeyValueStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Upstash Redis over its REST surface: one command per POST, the command
/// encoded as a JSON array, the reply under `result`.
pub struct UpstashKv {
    http: Client,
    base_url: String,
    token: String,
}

impl UpstashKv {
    pub fn new(http: Client, rest_url: String, rest_token: String) -> Result<Self> {
        let base_url = rest_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow!("upstash rest_url is empty"));
        }
        if rest_token.trim().is_empty() {
            return Err(anyhow!("upstash rest_token is empty"));
        }
        Ok(Self {
            http,
            base_url,
            token: rest_token.trim().to_string(),
        })
    }

    async fn command(&self, parts: &[&str]) -> Result<Value> {
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&json!(parts))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!("upstash command failed: {status} {body}"));
        }
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(anyhow!("upstash command error: {error}"));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl KeyValueStore for UpstashKv {
    async fn set_nx(&self, key: &str, value: &str, ttl_s: u64) -> Result<bool> {
        let ttl = ttl_s.to_string();
        let result = self
            .command(&["SET", key, value, "EX", &ttl, "NX"])
            .await?;
        Ok(result.as_str() == Some("OK"))
    }

    async fn set(&self, key: &str, value: &str, ttl_s: Option<u64>) -> Result<()> {
        match ttl_s {
            Some(ttl) => {
                let ttl = ttl.to_string();
                self.command(&["SET", key, value, "EX", &ttl]).await?;
            }
            None => {
                self.command(&["SET", key, value]).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self.command(&["GET", key]).await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let result = self.command(&["GETDEL", key]).await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn incr_with_expiry(&self, key: &str, window_s: u64) -> Result<i64> {
        let count = self
            .command(&["INCR", key])
            .await?
            .as_i64()
            .ok_or_else(|| anyhow!("upstash INCR returned a non-numeric result"))?;
        if count == 1 {
            let window = window_s.to_string();
            self.command(&["EXPIRE", key, &window]).await?;
        }
        Ok(count)
    }

    async fn list_push(&self, key: &str, value: &str, keep_last: i64, ttl_s: u64) -> Result<()> {
        self.command(&["RPUSH", key, value]).await?;
        let from = (-keep_last).to_string();
        self.command(&["LTRIM", key, &from, "-1"]).await?;
        let ttl = ttl_s.to_string();
        self.command(&["EXPIRE", key, &ttl]).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let result = self.command(&["LRANGE", key, "0", "-1"]).await?;
        let Value::Array(items) = result else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect())
    }
}
