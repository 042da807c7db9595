use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};

use super::confirmation::ConfirmationService;
use super::conversation::ConversationMemory;
use crate::event_parser::parse_calendar_event_request;
use crate::llm::{ChatMessage, ModelBackend};
use crate::storage::{AuditEvent, RelationalStore};
use crate::tools::{requires_confirmation, ToolExecutor};

struct InferredAction {
    tool: &'static str,
    payload: Value,
    preview: String,
}

/// The assistant conversation loop. Order matters: a pending confirmation
/// always wins, then keyword-inferred tool actions, then the model
/// fallback over recent history.
pub struct AgentService {
    confirmations: ConfirmationService,
    memory: ConversationMemory,
    model: Arc<dyn ModelBackend>,
    executor: Arc<ToolExecutor>,
    store: Arc<dyn RelationalStore>,
}

impl AgentService {
    pub fn new(
        confirmations: ConfirmationService,
        memory: ConversationMemory,
        model: Arc<dyn ModelBackend>,
        executor: Arc<ToolExecutor>,
        store: Arc<dyn RelationalStore>,
    ) -> Self {
        Self {
            confirmations,
            memory,
            model,
            executor,
            store,
        }
    }

    pub async fn handle_message(&self, user_id: &str, text: &str) -> Result<String> {
        self.memory.append(user_id, "user", text).await?;

        if let Some(pending) = self.confirmations.get(user_id).await? {
            return self.handle_pending(user_id, text, pending).await;
        }

        if let Some(action) = infer_action(text) {
            if requires_confirmation(action.tool) {
                let pending = self
                    .confirmations
                    .create(user_id, action.tool, action.payload)
                    .await?;
                self.audit(user_id, "confirmation_requested", action.tool).await;
                let reply = format!(
                    "{}\n\nReply YES {} to confirm, or NO to cancel.",
                    action.preview, pending.nonce
                );
                self.memory.append(user_id, "assistant", &reply).await?;
                return Ok(reply);
            }

            let result = self
                .executor
                .execute(user_id, action.tool, &action.payload)
                .await?;
            self.audit(user_id, "tool_executed_auto", action.tool).await;
            self.memory.append(user_id, "assistant", &result.content).await?;
            return Ok(result.content);
        }

        self.model_reply(user_id, text).await
    }

    async fn handle_pending(
        &self,
        user_id: &str,
        text: &str,
        pending: super::confirmation::PendingConfirmation,
    ) -> Result<String> {
        let trimmed = text.trim();

        if trimmed.eq_ignore_ascii_case("no") {
            self.confirmations.consume(user_id).await?;
            self.audit(user_id, "confirmation_rejected", &pending.tool).await;
            let reply = "Cancelled. No changes were made.";
            self.memory.append(user_id, "assistant", reply).await?;
            return Ok(reply.to_string());
        }

        if let Some(nonce) = parse_confirm_reply(trimmed) {
            if nonce != pending.nonce {
                return Ok(
                    "Confirmation code mismatch. Reply exactly with the latest YES code or NO."
                        .to_string(),
                );
            }
            if !requires_confirmation(&pending.tool) {
                return Ok("No confirmation is required for that action.".to_string());
            }

            let result = self
                .executor
                .execute(user_id, &pending.tool, &pending.payload)
                .await?;
            self.confirmations.consume(user_id).await?;
            self.audit(user_id, "tool_executed_after_confirmation", &pending.tool)
                .await;
            self.memory.append(user_id, "assistant", &result.content).await?;
            return Ok(result.content);
        }

        Ok("You have a pending action. Reply YES <code> to continue or NO to cancel.".to_string())
    }

    async fn model_reply(&self, user_id: &str, text: &str) -> Result<String> {
        let prior = self.memory.read(user_id).await?;
        let system = "You are a concise personal assistant. Do not claim actions were executed \
                      unless explicitly confirmed. If user asks for sensitive changes, tell them \
                      to use explicit commands.";

        let mut messages = vec![ChatMessage::new("system", system)];
        let skip = prior.len().saturating_sub(12);
        for message in prior.iter().skip(skip) {
            messages.push(ChatMessage::new(&message.role, &message.content));
        }
        messages.push(ChatMessage::new("user", text));

        let response = self.model.complete(&messages).await?;
        self.memory.append(user_id, "assistant", &response).await?;
        Ok(response)
    }

    async fn audit(&self, user_id: &str, event_type: &str, tool: &str) {
        let event = AuditEvent {
            actor_user_id: Some(user_id.to_string()),
            event_type: event_type.to_string(),
            metadata: json!({ "tool": tool }),
        };
        if let Err(error) = self.store.log_audit(event).await {
            tracing::warn!(%error, event_type, "audit write failed");
        }
    }
}

/// `YES 123456` (case-insensitive) with a 6-digit code.
fn parse_confirm_reply(text: &str) -> Option<&str> {
    let head = text.get(..3)?;
    if !head.eq_ignore_ascii_case("yes") {
        return None;
    }
    let rest = &text[3..];
    if !rest.starts_with(' ') {
        return None;
    }
    let code = rest.trim();
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Some(code)
    } else {
        None
    }
}

fn infer_action(text: &str) -> Option<InferredAction> {
    let normalized = text.to_lowercase();

    if normalized.contains("weather") {
        return Some(InferredAction {
            tool: "weather_forecast",
            payload: json!({ "location": "default", "days": 1 }),
            preview: "Fetching weather forecast.".to_string(),
        });
    }

    if normalized.contains("calendar")
        && (normalized.contains("today") || normalized.contains("tomorrow"))
    {
        let range = if normalized.contains("tomorrow") {
            "tomorrow"
        } else {
            "today"
        };
        return Some(InferredAction {
            tool: "calendar_read",
            payload: json!({ "range": range }),
            preview: "Reading your calendar.".to_string(),
        });
    }

    if normalized.contains("email") || normalized.contains("inbox") {
        return Some(InferredAction {
            tool: "email_read",
            payload: json!({ "since": "24h", "limit": 5 }),
            preview: "Checking email summaries.".to_string(),
        });
    }

    let wants_create = ["add", "create", "schedule"]
        .iter()
        .any(|verb| contains_word(&normalized, verb));
    let mentions_event = ["event", "appointment", "meeting", "calendar"]
        .iter()
        .any(|noun| contains_word(&normalized, noun));
    if wants_create && mentions_event {
        let parsed = parse_calendar_event_request(text, Utc::now());
        let mut payload = json!({
            "title": parsed.title,
            "when": parsed.when_iso.clone().unwrap_or_default(),
            "durationMinutes": parsed.duration_minutes,
        });
        if let Some(location) = &parsed.location {
            payload["location"] = json!(location);
        }
        let preview = [
            "I will create this calendar event.".to_string(),
            format!("Title: {}", parsed.title),
            format!("Duration: {} minutes", parsed.duration_minutes),
            format!(
                "Location: {}",
                parsed.location.as_deref().unwrap_or("(none)")
            ),
            match &parsed.when_iso {
                Some(when) => format!("Detected time: {when}"),
                None => "No date/time detected. Include one like 'tomorrow 2pm' or an ISO time."
                    .to_string(),
            },
        ]
        .join("\n");
        return Some(InferredAction {
            tool: "calendar_write_create",
            payload,
            preview,
        });
    }

    None
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|part| part == word)
}
