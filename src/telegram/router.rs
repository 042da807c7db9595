use std::sync::Arc;

use anyhow::Result;

use super::client::Transport;
use super::types::TelegramUpdate;
use crate::services::agent::AgentService;
use crate::services::heartbeat_config::HeartbeatConfigService;
use crate::services::integrations::IntegrationService;
use crate::services::ownership::{ClaimResult, OwnershipService};

/// Per-update decision tree: claim flow while unclaimed, allow-list gate
/// once claimed, then slash commands and finally the agent conversation.
pub struct UpdateRouter {
    transport: Arc<dyn Transport>,
    ownership: Arc<OwnershipService>,
    agent: Arc<AgentService>,
    integrations: Arc<IntegrationService>,
    heartbeats: Arc<HeartbeatConfigService>,
}

impl UpdateRouter {
    pub fn new(
        transport: Arc<dyn Transport>,
        ownership: Arc<OwnershipService>,
        agent: Arc<AgentService>,
        integrations: Arc<IntegrationService>,
        heartbeats: Arc<HeartbeatConfigService>,
    ) -> Self {
        Self {
            transport,
            ownership,
            agent,
            integrations,
            heartbeats,
        }
    }

    pub async fn route(&self, update: &TelegramUpdate) -> Result<()> {
        let Some((chat_id, user_id, text)) = update.text_parts() else {
            return Ok(());
        };
        if !update.is_private() {
            return Ok(());
        }

        if self.ownership.owner_user_id().await?.is_none() {
            return self.handle_unclaimed(&chat_id, &user_id, &text).await;
        }

        if !self.ownership.is_allowed(&user_id).await? {
            tracing::warn!(%user_id, "ignored message from non-whitelisted user");
            return Ok(());
        }

        if text == "/start" {
            return self
                .transport
                .send_message(
                    &chat_id,
                    "Assistant is online. Use /help to view available commands.",
                )
                .await;
        }

        if text == "/help" {
            let help = [
                "Available commands:",
                "/help",
                "/integrations",
                "/heartbeats",
                "Reply with a normal message for assistant responses.",
                "For write actions you must confirm with YES <code>.",
            ]
            .join("\n");
            return self.transport.send_message(&chat_id, &help).await;
        }

        if text.starts_with("/integrations") {
            let reply = self.integrations.handle_command(&user_id, &text).await?;
            return self.transport.send_message(&chat_id, &reply).await;
        }

        if text.starts_with("/heartbeats") {
            let reply = self.heartbeats.handle_command(&user_id, &text).await?;
            return self.transport.send_message(&chat_id, &reply).await;
        }

        let reply = self.agent.handle_message(&user_id, &text).await?;
        self.transport.send_message(&chat_id, &reply).await
    }

    async fn handle_unclaimed(&self, chat_id: &str, user_id: &str, text: &str) -> Result<()> {
        if let Some(code) = parse_claim_command(text) {
            if code.is_empty() {
                return self
                    .transport
                    .send_message(chat_id, "Invalid claim command. Use /claim <code>.")
                    .await;
            }
            let reply = match self.ownership.claim(user_id, code).await? {
                ClaimResult::Claimed => {
                    "Claim successful. You are now the owner and have been added to the whitelist."
                }
                ClaimResult::TooManyAttempts => "Too many claim attempts. Try again later.",
                ClaimResult::AlreadyClaimed => "Ownership already claimed.",
                ClaimResult::Unavailable => {
                    "Claim code is not available. Check deployment config."
                }
                ClaimResult::InvalidCode => "Invalid claim code.",
            };
            return self.transport.send_message(chat_id, reply).await;
        }

        if text == "/start" {
            let reply = [
                "Setup required before this assistant can run.".to_string(),
                format!("Your Telegram ID: {user_id}"),
                "Use: /claim <your-secret-claim-code>".to_string(),
            ]
            .join("\n");
            return self.transport.send_message(chat_id, &reply).await;
        }

        self.transport
            .send_message(chat_id, "This bot is not claimed yet. Use /claim <code>.")
            .await
    }
}

fn parse_claim_command(text: &str) -> Option<&str> {
    let head = text.get(..6)?;
    if !head.eq_ignore_ascii_case("/claim") {
        return None;
    }
    let rest = &text[6..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some(rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_command_parsing() {
        assert_eq!(parse_claim_command("/claim secret"), Some("secret"));
        assert_eq!(parse_claim_command("/CLAIM secret"), Some("secret"));
        assert_eq!(parse_claim_command("/claim"), Some(""));
        assert_eq!(parse_claim_command("/claimsecret"), None);
        assert_eq!(parse_claim_command("/start"), None);
    }
}
