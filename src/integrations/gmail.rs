use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::services::google_oauth::{GoogleKind, GoogleOAuthService};

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

/// Read-only Gmail summary client. Fetches recent inbox message metadata
/// and renders one line per message.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    oauth: Arc<GoogleOAuthService>,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, base_url: String, oauth: Arc<GoogleOAuthService>) -> Self {
        Self {
            http,
            base_url,
            oauth,
        }
    }

    pub async fn important_summary(&self, user_id: &str, limit: i64) -> Result<String> {
        let token = self
            .oauth
            .get_valid_access_token(user_id, GoogleKind::Gmail)
            .await?;
        let limit = limit.max(1);

        let list_url = format!(
            "{}/gmail/v1/users/me/messages",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(list_url)
            .bearer_auth(&token)
            .query(&[
                ("maxResults", limit.to_string().as_str()),
                ("q", "is:inbox newer_than:2d"),
            ])
            .send()
            .await
            .context("gmail list request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("gmail list request failed ({})", response.status()));
        }
        let listing: ListResponse = response
            .json()
            .await
            .context("gmail list response was malformed JSON")?;

        if listing.messages.is_empty() {
            return Ok("No recent inbox messages.".to_string());
        }

        let mut lines = vec!["Recent inbox summary:".to_string()];
        for message_ref in listing.messages.iter().take(limit as usize) {
            // Skip messages that fail to load instead of failing the summary.
            match self.fetch_metadata(&token, &message_ref.id).await {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(%error, "gmail message metadata fetch failed");
                }
            }
        }
        Ok(lines.join("\n"))
    }

    async fn fetch_metadata(&self, token: &str, message_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/gmail/v1/users/me/messages/{}",
            self.base_url.trim_end_matches('/'),
            message_id
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
            ])
            .send()
            .await
            .context("gmail message request failed")?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let message: Message = response
            .json()
            .await
            .context("gmail message response was malformed JSON")?;

        let payload = message.payload.unwrap_or_default();
        let subject = header_value(&payload.headers, "subject").unwrap_or("(no subject)");
        let from = header_value(&payload.headers, "from").unwrap_or("unknown sender");
        let snippet = message.snippet.as_deref().unwrap_or("");
        let line = if snippet.is_empty() {
            format!("- {subject} from {from}")
        } else {
            format!("- {subject} from {from} ({snippet})")
        };
        Ok(Some(line))
    }
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}
