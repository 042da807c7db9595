// Config loading with YAML overrides and ${ENV:-default} placeholder expansion.
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_u16_from_any")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub poll_timeout_s: u64,
    pub poll_retry_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_s: 30,
            poll_retry_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-haiku".to_string(),
            temperature: 0.2,
            max_tokens: 700,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerConfig {
    pub claim_code: String,
    pub claim_pepper: String,
    pub claim_attempt_max: i64,
    pub claim_attempt_window_s: u64,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            claim_code: String::new(),
            claim_pepper: String::new(),
            claim_attempt_max: 5,
            claim_attempt_window_s: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            postgres: PostgresConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub dsn: String,
    pub connect_timeout_s: u64,
    pub pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            connect_timeout_s: 10,
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub backend: String,
    #[serde(default)]
    pub upstash: UpstashConfig,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: "upstash".to_string(),
            upstash: UpstashConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UpstashConfig {
    pub rest_url: String,
    pub rest_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub public_base_url: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Explicit redirect URI; defaults to `{public_base_url}/oauth/google/callback`.
    pub redirect_uri: String,
    pub token_encryption_key: String,
    pub state_ttl_s: u64,
    pub connect_attempt_max: i64,
    pub connect_attempt_window_s: u64,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub revoke_endpoint: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            google_client_id: String::new(),
            google_client_secret: String::new(),
            redirect_uri: String::new(),
            token_encryption_key: String::new(),
            state_ttl_s: 600,
            connect_attempt_max: 10,
            connect_attempt_window_s: 300,
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            revoke_endpoint: "https://oauth2.googleapis.com/revoke".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub confirmation_ttl_s: u64,
    pub conversation_window: i64,
    pub conversation_ttl_s: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            confirmation_ttl_s: 300,
            conversation_window: 20,
            conversation_ttl_s: 60 * 60 * 24 * 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    pub openweather_api_key: String,
    pub default_weather_location: String,
    pub google_calendar_id: String,
    pub heartbeat_max_emails: i64,
    pub weather_api_base: String,
    pub calendar_api_base: String,
    pub gmail_api_base: String,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            openweather_api_key: String::new(),
            default_weather_location: "San Francisco, CA".to_string(),
            google_calendar_id: "primary".to_string(),
            heartbeat_max_emails: 5,
            weather_api_base: "https://api.openweathermap.org".to_string(),
            calendar_api_base: "https://www.googleapis.com".to_string(),
            gmail_api_base: "https://gmail.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub tick_interval_s: u64,
    pub slot_ttl_s: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_s: 60,
            slot_ttl_s: 60 * 60 * 2,
        }
    }
}

impl OAuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.public_base_url.trim().is_empty()
            && !self.google_client_id.trim().is_empty()
            && !self.google_client_secret.trim().is_empty()
            && !self.token_encryption_key.trim().is_empty()
    }

    pub fn resolved_redirect_uri(&self) -> String {
        let explicit = self.redirect_uri.trim();
        if !explicit.is_empty() {
            return explicit.to_string();
        }
        format!(
            "{}/oauth/google/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

fn deserialize_u16_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct U16Visitor;

    impl Visitor<'_> for U16Visitor {
        type Value = u16;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a port number or numeric string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u16, E> {
            u16::try_from(value).map_err(|_| E::custom("port out of range"))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u16, E> {
            u16::try_from(value).map_err(|_| E::custom("port out of range"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u16, E> {
            value
                .trim()
                .parse::<u16>()
                .map_err(|_| E::custom("port is not a number"))
        }
    }

    deserializer.deserialize_any(U16Visitor)
}

pub fn load_config() -> Config {
    let base_path =
        env::var("HEARTH_CONFIG_PATH").unwrap_or_else(|_| "config/hearth.yaml".to_string());
    let override_path = env::var("HEARTH_CONFIG_OVERRIDE_PATH")
        .unwrap_or_else(|_| "data/config/hearth.override.yaml".to_string());

    let mut merged = read_yaml(&base_path);
    if Path::new(&override_path).exists() {
        // Only non-null override fields replace the base values.
        let override_value = read_yaml(&override_path);
        merge_yaml(&mut merged, override_value);
    }

    expand_yaml_env(&mut merged);

    serde_yaml::from_value::<Config>(merged).unwrap_or_else(|err| {
        warn!("config parse failed, falling back to defaults: {err}");
        Config::default()
    })
}

fn read_yaml(path: &str) -> Value {
    // A missing config file is fine; env placeholders cover fresh deployments.
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("config read failed: {path}, {err}");
            return Value::Null;
        }
    };
    serde_yaml::from_str(&content).unwrap_or_else(|err| {
        warn!("config yaml parse failed: {path}, {err}");
        Value::Null
    })
}

fn merge_yaml(base: &mut Value, override_value: Value) {
    match (base, override_value) {
        (Value::Mapping(base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, override_value) => {
            if !override_value.is_null() {
                *base_slot = override_value;
            }
        }
    }
}

fn expand_yaml_env(value: &mut Value) {
    match value {
        Value::String(text) => {
            *text = expand_env_placeholders(text);
        }
        Value::Sequence(items) => {
            for item in items {
                expand_yaml_env(item);
            }
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                expand_yaml_env(value);
            }
        }
        _ => {}
    }
}

fn expand_env_placeholders(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        let Some(end) = rest.find('}') else {
            output.push_str("${");
            output.push_str(rest);
            return output;
        };
        let inner = &rest[..end];
        rest = &rest[end + 1..];
        let (name, default_value) = match inner.split_once(":-") {
            Some((name, default_value)) => (name.trim(), Some(default_value)),
            None => (inner.trim(), None),
        };
        if name.is_empty() {
            output.push_str("${");
            output.push_str(inner);
            output.push('}');
            continue;
        }
        let resolved = env::var(name).ok().filter(|value| !value.is_empty());
        match (resolved, default_value) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default_value)) => output.push_str(default_value),
            (None, None) => {}
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_placeholders() {
        std::env::remove_var("HEARTH_TEST_PLACEHOLDER");
        assert_eq!(
            expand_env_placeholders("${HEARTH_TEST_PLACEHOLDER:-default}"),
            "default"
        );
        assert_eq!(
            expand_env_placeholders("pre-${HEARTH_TEST_PLACEHOLDER:-d}-post"),
            "pre-d-post"
        );

        std::env::set_var("HEARTH_TEST_PLACEHOLDER", "value");
        assert_eq!(
            expand_env_placeholders("${HEARTH_TEST_PLACEHOLDER:-default}"),
            "value"
        );
        std::env::remove_var("HEARTH_TEST_PLACEHOLDER");
        assert_eq!(expand_env_placeholders("${HEARTH_TEST_PLACEHOLDER}"), "");
    }

    #[test]
    fn test_redirect_uri_resolution() {
        let mut oauth = OAuthConfig {
            public_base_url: "https://bot.example.com/".to_string(),
            ..OAuthConfig::default()
        };
        assert_eq!(
            oauth.resolved_redirect_uri(),
            "https://bot.example.com/oauth/google/callback"
        );
        oauth.redirect_uri = "https://other.example.com/cb".to_string();
        assert_eq!(oauth.resolved_redirect_uri(), "https://other.example.com/cb");
    }
}
