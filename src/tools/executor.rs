use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use serde_json::Value;

use crate::integrations::{CalendarClient, CalendarRange, GmailClient, WeatherClient};
use crate::services::integrations::IntegrationService;
use crate::storage::RelationalStore;

#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub tool: String,
    pub content: String,
}

/// Dispatches a named tool with a loosely-typed payload against the
/// integration clients. Policy (tiers, confirmation) is decided by the
/// caller; by the time a call lands here it is authorized.
pub struct ToolExecutor {
    store: Arc<dyn RelationalStore>,
    integrations: Arc<IntegrationService>,
    weather: Arc<WeatherClient>,
    calendar: Arc<CalendarClient>,
    gmail: Arc<GmailClient>,
}

impl ToolExecutor {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        integrations: Arc<IntegrationService>,
        weather: Arc<WeatherClient>,
        calendar: Arc<CalendarClient>,
        gmail: Arc<GmailClient>,
    ) -> Self {
        Self {
            store,
            integrations,
            weather,
            calendar,
            gmail,
        }
    }

    pub async fn execute(
        &self,
        user_id: &str,
        tool: &str,
        payload: &Value,
    ) -> Result<ToolExecutionResult> {
        let content = match tool {
            "weather_forecast" => {
                let default_location = self.integrations.get_weather_location(user_id).await?;
                let location = text_or(payload.get("location"), &default_location);
                // "default" is the sentinel the action inference emits.
                let location = if location == "default" {
                    default_location
                } else {
                    location
                };
                let days = number_or(payload.get("days"), 1);
                self.weather.forecast(&location, days).await?
            }
            "calendar_read" => {
                let range = CalendarRange::parse(&text_or(payload.get("range"), "today"));
                let calendar_id = self.integrations.get_calendar_id(user_id).await?;
                let tz = self.owner_timezone(user_id).await;
                self.calendar
                    .list_events(user_id, range, &calendar_id, tz)
                    .await?
            }
            "email_read" => {
                if !self.integrations.is_gmail_enabled(user_id).await? {
                    return Ok(ToolExecutionResult {
                        tool: tool.to_string(),
                        content: "Gmail integration is disabled. Enable with /integrations gmail"
                            .to_string(),
                    });
                }
                let limit = number_or(payload.get("limit"), 5);
                self.gmail.important_summary(user_id, limit).await?
            }
            "calendar_write_create" => {
                let title = text_or(payload.get("title"), "Untitled event");
                let when_iso = text_or(payload.get("when"), "");
                if when_iso.is_empty() || DateTime::parse_from_rfc3339(&when_iso).is_err() {
                    return Ok(ToolExecutionResult {
                        tool: tool.to_string(),
                        content: "I need a date/time. Try 'tomorrow 2pm' or ISO like \
                                  2026-02-10T15:00:00-08:00."
                            .to_string(),
                    });
                }
                let duration_minutes = number_or(payload.get("durationMinutes"), 60);
                let location = optional_text(payload.get("location"));
                let calendar_id = self.integrations.get_calendar_id(user_id).await?;
                let tz = self.owner_timezone(user_id).await;
                self.calendar
                    .create_event(
                        user_id,
                        &title,
                        &when_iso,
                        &calendar_id,
                        duration_minutes,
                        location.as_deref(),
                        tz,
                    )
                    .await?
            }
            other => return Err(anyhow!("unsupported tool: {other}")),
        };
        Ok(ToolExecutionResult {
            tool: tool.to_string(),
            content,
        })
    }

    async fn owner_timezone(&self, user_id: &str) -> Tz {
        let stored = self.store.get_timezone(user_id).await.ok().flatten();
        stored
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::UTC)
    }
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn number_or(value: Option<&Value>, fallback: i64) -> i64 {
    match value {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(fallback),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(fallback),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercion_helpers_handle_loose_payloads() {
        assert_eq!(text_or(Some(&json!("Lisbon")), "x"), "Lisbon");
        assert_eq!(text_or(Some(&json!("  ")), "x"), "x");
        assert_eq!(text_or(Some(&json!(7)), "x"), "x");
        assert_eq!(text_or(None, "x"), "x");

        assert_eq!(number_or(Some(&json!(3)), 1), 3);
        assert_eq!(number_or(Some(&json!("4")), 1), 4);
        assert_eq!(number_or(Some(&json!("nope")), 1), 1);
        assert_eq!(number_or(None, 1), 1);

        assert_eq!(optional_text(Some(&json!(" HQ "))), Some("HQ".to_string()));
        assert_eq!(optional_text(Some(&json!(""))), None);
        assert_eq!(optional_text(None), None);
    }
}
