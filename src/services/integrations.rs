use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use super::google_oauth::{GoogleKind, GoogleOAuthService};
use super::rate_limit::RateLimiter;
use crate::config::{IntegrationsConfig, OAuthConfig};
use crate::storage::RelationalStore;

/// The /integrations command surface plus the per-tool config lookups
/// (weather location, calendar id, gmail enablement).
pub struct IntegrationService {
    store: Arc<dyn RelationalStore>,
    oauth: Arc<GoogleOAuthService>,
    limiter: Arc<RateLimiter>,
    config: IntegrationsConfig,
    oauth_config: OAuthConfig,
}

impl IntegrationService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        oauth: Arc<GoogleOAuthService>,
        limiter: Arc<RateLimiter>,
        config: IntegrationsConfig,
        oauth_config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            oauth,
            limiter,
            config,
            oauth_config,
        }
    }

    pub async fn handle_command(&self, user_id: &str, text: &str) -> Result<String> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() == 1 {
            return self.format_status(user_id).await;
        }

        let subcommand = parts.get(1).map(|part| part.to_lowercase());
        match subcommand.as_deref() {
            Some("weather") => {
                let location = parts[2..].join(" ");
                if location.trim().is_empty() {
                    return Ok("Usage: /integrations weather <location>".to_string());
                }
                self.store
                    .upsert_integration(
                        user_id,
                        "weather",
                        "openweather",
                        &json!({ "location": location }),
                    )
                    .await?;
                Ok(format!("Weather integration configured for: {location}"))
            }
            Some("calendar") => {
                let calendar_id = parts[2..].join(" ");
                if calendar_id.trim().is_empty() {
                    return Ok(
                        "Usage: /integrations calendar <calendarId> (example: primary)".to_string(),
                    );
                }
                self.store
                    .upsert_integration(
                        user_id,
                        "calendar",
                        "google",
                        &json!({ "calendarId": calendar_id }),
                    )
                    .await?;
                Ok(format!(
                    "Google Calendar integration enabled (calendar: {calendar_id})."
                ))
            }
            Some("gmail") => {
                let existing = self.store.get_integration(user_id, "gmail").await?;
                let config = existing.map(|connection| connection.config);
                if !has_oauth_token(config.as_ref()) {
                    return Ok(
                        "Gmail is not connected yet. Use: /integrations connect gmail".to_string()
                    );
                }
                let mut merged = config.unwrap_or_else(|| json!({}));
                if let Some(map) = merged.as_object_mut() {
                    map.insert("enabled".to_string(), Value::Bool(true));
                }
                self.store
                    .upsert_integration(user_id, "gmail", "google", &merged)
                    .await?;
                Ok("Gmail integration enabled.".to_string())
            }
            Some("connect") => self.handle_connect(user_id, parts.get(2).copied()).await,
            Some("disconnect") => self.handle_disconnect(user_id, parts.get(2).copied()).await,
            Some("disable") => {
                let target = parts.get(2).map(|part| part.to_lowercase());
                let target = match target.as_deref() {
                    Some(value @ ("weather" | "calendar" | "gmail")) => value.to_string(),
                    _ => {
                        return Ok(
                            "Usage: /integrations disable <weather|calendar|gmail>".to_string()
                        )
                    }
                };
                let provider = if target == "weather" {
                    "openweather"
                } else {
                    "google"
                };
                self.store
                    .upsert_integration(user_id, &target, provider, &json!({ "enabled": false }))
                    .await?;
                Ok(format!("Disabled {target} integration."))
            }
            _ => Ok(help_text()),
        }
    }

    async fn handle_connect(&self, user_id: &str, target: Option<&str>) -> Result<String> {
        let kind = target
            .map(str::to_lowercase)
            .as_deref()
            .and_then(GoogleKind::parse);
        let Some(kind) = kind else {
            return Ok("Usage: /integrations connect <calendar|gmail>".to_string());
        };

        let allowed = self
            .limiter
            .check(
                &format!("oauth:connect:{user_id}"),
                self.oauth_config.connect_attempt_max,
                self.oauth_config.connect_attempt_window_s,
            )
            .await;
        if !allowed {
            return Ok("Too many connect attempts. Try again later.".to_string());
        }
        if !self.oauth.is_configured() {
            return Ok(
                "OAuth is not configured on this deployment. Set the Google OAuth and token \
                 encryption settings first."
                    .to_string(),
            );
        }

        let url = self.oauth.create_connect_url(user_id, kind).await?;
        Ok(format!("Connect Google {}:\n{url}", kind.as_str()))
    }

    async fn handle_disconnect(&self, user_id: &str, target: Option<&str>) -> Result<String> {
        let kind = target
            .map(str::to_lowercase)
            .as_deref()
            .and_then(GoogleKind::parse);
        let Some(kind) = kind else {
            return Ok("Usage: /integrations disconnect <calendar|gmail>".to_string());
        };

        let existing = self.store.get_integration(user_id, kind.as_str()).await?;
        let Some(existing) = existing else {
            return Ok(format!("Google {} is already disconnected.", kind.as_str()));
        };

        // A failed remote revoke never blocks the local disconnect.
        if let Err(error) = self.oauth.revoke_integration_tokens(user_id, kind).await {
            tracing::warn!(%error, kind = kind.as_str(), "token revoke failed");
        }

        let mut config = existing.config;
        if let Some(map) = config.as_object_mut() {
            map.insert("enabled".to_string(), Value::Bool(false));
            map.remove("token");
            map.remove("tokenEncrypted");
        }
        self.store
            .upsert_integration(user_id, kind.as_str(), "google", &config)
            .await?;
        Ok(format!("Google {} disconnected.", kind.as_str()))
    }

    pub async fn get_weather_location(&self, user_id: &str) -> Result<String> {
        let integration = self.store.get_integration(user_id, "weather").await?;
        let configured = integration
            .as_ref()
            .and_then(|connection| connection.config.get("location"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        Ok(configured
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_weather_location.clone()))
    }

    pub async fn get_calendar_id(&self, user_id: &str) -> Result<String> {
        let integration = self.store.get_integration(user_id, "calendar").await?;
        let configured = integration
            .as_ref()
            .and_then(|connection| connection.config.get("calendarId"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        Ok(configured
            .map(str::to_string)
            .unwrap_or_else(|| self.config.google_calendar_id.clone()))
    }

    /// Gmail is enabled when connected and not explicitly disabled.
    pub async fn is_gmail_enabled(&self, user_id: &str) -> Result<bool> {
        let integration = self.store.get_integration(user_id, "gmail").await?;
        let Some(integration) = integration else {
            return Ok(false);
        };
        Ok(integration.config.get("enabled") != Some(&Value::Bool(false)))
    }

    async fn format_status(&self, user_id: &str) -> Result<String> {
        let all = self.store.list_integrations(user_id).await?;
        let find = |kind: &str| {
            all.iter()
                .find(|connection| connection.integration_type == kind)
        };

        let weather = find("weather");
        let calendar = find("calendar");
        let gmail = find("gmail");

        let weather_location = weather
            .and_then(|connection| connection.config.get("location"))
            .and_then(Value::as_str)
            .unwrap_or(&self.config.default_weather_location);
        let calendar_id = calendar
            .and_then(|connection| connection.config.get("calendarId"))
            .and_then(Value::as_str)
            .unwrap_or(&self.config.google_calendar_id);
        let calendar_connected =
            has_oauth_token(calendar.map(|connection| &connection.config));
        let gmail_connected = has_oauth_token(gmail.map(|connection| &connection.config));
        let gmail_enabled = match gmail {
            Some(connection) => connection.config.get("enabled") != Some(&Value::Bool(false)),
            None => gmail_connected,
        };

        let weather_line = if self.config.openweather_api_key.trim().is_empty() {
            "- Weather: missing OpenWeather API key".to_string()
        } else {
            format!("- Weather: configured ({weather_location})")
        };
        let calendar_line = if calendar_connected {
            format!("- Google Calendar: connected ({calendar_id})")
        } else {
            "- Google Calendar: not connected (/integrations connect calendar)".to_string()
        };
        let gmail_line = if gmail_connected {
            if gmail_enabled {
                "- Gmail: connected".to_string()
            } else {
                "- Gmail: disabled".to_string()
            }
        } else {
            "- Gmail: not connected (/integrations connect gmail)".to_string()
        };

        Ok([
            "Integrations:".to_string(),
            weather_line,
            calendar_line,
            gmail_line,
            String::new(),
            "Commands:".to_string(),
            "/integrations weather <location>".to_string(),
            "/integrations calendar <calendarId>".to_string(),
            "/integrations connect <calendar|gmail>".to_string(),
            "/integrations disconnect <calendar|gmail>".to_string(),
            "/integrations gmail".to_string(),
            "/integrations disable <weather|calendar|gmail>".to_string(),
        ]
        .join("\n"))
    }
}

fn help_text() -> String {
    [
        "Integration commands:",
        "/integrations",
        "/integrations weather <location>",
        "/integrations calendar <calendarId>",
        "/integrations connect <calendar|gmail>",
        "/integrations disconnect <calendar|gmail>",
        "/integrations gmail",
        "/integrations disable <weather|calendar|gmail>",
    ]
    .join("\n")
}

fn has_oauth_token(config: Option<&Value>) -> bool {
    let Some(config) = config else {
        return false;
    };
    if config
        .get("tokenEncrypted")
        .and_then(Value::as_str)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    config
        .get("token")
        .and_then(|token| token.get("accessToken"))
        .and_then(Value::as_str)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::storage::MemoryStore;

    fn service(store: Arc<MemoryStore>) -> IntegrationService {
        let kv = Arc::new(MemoryKv::new());
        let oauth = Arc::new(GoogleOAuthService::new(
            store.clone(),
            kv.clone(),
            reqwest::Client::new(),
            OAuthConfig::default(),
            "primary".to_string(),
        ));
        IntegrationService::new(
            store,
            oauth,
            Arc::new(RateLimiter::new(kv)),
            IntegrationsConfig::default(),
            OAuthConfig::default(),
        )
    }

    #[tokio::test]
    async fn weather_subcommand_stores_location() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let reply = service
            .handle_command("u1", "/integrations weather Lisbon, Portugal")
            .await
            .unwrap();
        assert!(reply.contains("Lisbon, Portugal"));
        assert_eq!(
            service.get_weather_location("u1").await.unwrap(),
            "Lisbon, Portugal"
        );
    }

    #[tokio::test]
    async fn weather_location_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store);
        assert_eq!(
            service.get_weather_location("u1").await.unwrap(),
            IntegrationsConfig::default().default_weather_location
        );
    }

    #[tokio::test]
    async fn gmail_enable_requires_connection() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let reply = service.handle_command("u1", "/integrations gmail").await.unwrap();
        assert!(reply.contains("not connected"));
        assert!(!service.is_gmail_enabled("u1").await.unwrap());

        store
            .upsert_integration(
                "u1",
                "gmail",
                "google",
                &json!({ "tokenEncrypted": "v1.a.b.c" }),
            )
            .await
            .unwrap();
        let reply = service.handle_command("u1", "/integrations gmail").await.unwrap();
        assert_eq!(reply, "Gmail integration enabled.");
        assert!(service.is_gmail_enabled("u1").await.unwrap());
    }

    #[tokio::test]
    async fn connect_refuses_when_oauth_unconfigured() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store);
        let reply = service
            .handle_command("u1", "/integrations connect gmail")
            .await
            .unwrap();
        assert!(reply.contains("not configured"));
    }

    #[tokio::test]
    async fn disconnect_strips_stored_tokens() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        store
            .upsert_integration(
                "u1",
                "calendar",
                "google",
                &json!({ "tokenEncrypted": "v1.a.b.c", "calendarId": "primary" }),
            )
            .await
            .unwrap();

        let reply = service
            .handle_command("u1", "/integrations disconnect calendar")
            .await
            .unwrap();
        assert_eq!(reply, "Google calendar disconnected.");

        let stored = store.get_integration("u1", "calendar").await.unwrap().unwrap();
        assert!(stored.config.get("tokenEncrypted").is_none());
        assert_eq!(stored.config.get("enabled"), Some(&Value::Bool(false)));
        // Non-secret settings survive the disconnect.
        assert_eq!(
            stored.config.get("calendarId").and_then(Value::as_str),
            Some("primary")
        );
    }

    #[tokio::test]
    async fn unknown_subcommand_prints_help() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store);
        let reply = service.handle_command("u1", "/integrations frobnicate").await.unwrap();
        assert!(reply.starts_with("Integration commands:"));
    }
}
