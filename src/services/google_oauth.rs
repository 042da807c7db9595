use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::config::OAuthConfig;
use crate::kv::KeyValueStore;
use crate::security::TokenCipher;
use crate::storage::RelationalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoogleKind {
    Calendar,
    Gmail,
}

impl GoogleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoogleKind::Calendar => "calendar",
            GoogleKind::Gmail => "gmail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "calendar" => Some(GoogleKind::Calendar),
            "gmail" => Some(GoogleKind::Gmail),
            _ => None,
        }
    }

    fn scopes(&self) -> &'static str {
        match self {
            GoogleKind::Calendar => {
                "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/calendar.events"
            }
            GoogleKind::Gmail => "https://www.googleapis.com/auth/gmail.readonly",
        }
    }
}

/// State parked in the key-value store between link creation and callback.
/// Field names stay camelCase so records written before and after a
/// migration to this service remain interchangeable.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthState {
    user_id: String,
    kind: String,
    code_verifier: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredGoogleToken {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// Google OAuth with PKCE. Tokens are stored AES-GCM encrypted inside the
/// integration connection config; the one-time state key carries the code
/// verifier across the redirect round trip.
pub struct GoogleOAuthService {
    store: Arc<dyn RelationalStore>,
    kv: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
    config: OAuthConfig,
    default_calendar_id: String,
    cipher: Option<TokenCipher>,
}

impl GoogleOAuthService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        kv: Arc<dyn KeyValueStore>,
        http: reqwest::Client,
        config: OAuthConfig,
        default_calendar_id: String,
    ) -> Self {
        let cipher = if config.token_encryption_key.trim().is_empty() {
            None
        } else {
            TokenCipher::from_key_material(&config.token_encryption_key).ok()
        };
        Self {
            store,
            kv,
            http,
            config,
            default_calendar_id,
            cipher,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Reserve a fresh state + PKCE verifier and hand back the short link
    /// the bot sends to the user. The Google URL itself is built lazily at
    /// /oauth/google/start so the verifier never appears in chat.
    pub async fn create_connect_url(&self, user_id: &str, kind: GoogleKind) -> Result<String> {
        if !self.is_configured() {
            return Err(anyhow!("oauth is not configured"));
        }
        let state = Uuid::new_v4().to_string();
        let mut verifier_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut verifier_bytes);
        let code_verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let record = OAuthState {
            user_id: user_id.to_string(),
            kind: kind.as_str().to_string(),
            code_verifier,
        };
        self.kv
            .set(
                &state_key(&state),
                &serde_json::to_string(&record)?,
                Some(self.config.state_ttl_s),
            )
            .await?;

        Ok(format!(
            "{}/oauth/google/start?state={}",
            self.config.public_base_url.trim_end_matches('/'),
            state
        ))
    }

    /// Full Google consent URL for a previously reserved state, or None
    /// when the state is unknown or expired. The state stays live; it is
    /// only consumed by the callback.
    pub async fn build_auth_url_for_state(&self, state: &str) -> Result<Option<String>> {
        let record = match self.peek_state(state).await? {
            Some(record) => record,
            None => return Ok(None),
        };
        let kind = GoogleKind::parse(&record.kind)
            .ok_or_else(|| anyhow!("stored oauth state has unknown kind: {}", record.kind))?;

        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(record.code_verifier.as_bytes()));
        let mut url = Url::parse(&self.config.auth_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.google_client_id)
            .append_pair("redirect_uri", &self.config.resolved_redirect_uri())
            .append_pair("scope", kind.scopes())
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(Some(url.to_string()))
    }

    /// Redeem the authorization code. Consumes the state first so a
    /// replayed callback cannot exchange twice.
    pub async fn handle_callback(&self, state: &str, code: &str) -> Result<(String, GoogleKind)> {
        let record = self
            .consume_state(state)
            .await?
            .ok_or_else(|| anyhow!("invalid or expired oauth state"))?;
        let kind = GoogleKind::parse(&record.kind)
            .ok_or_else(|| anyhow!("stored oauth state has unknown kind: {}", record.kind))?;

        let token = self
            .exchange_authorization_code(code, &record.code_verifier)
            .await?;
        self.save_token(&record.user_id, kind, token, None).await?;
        Ok((record.user_id, kind))
    }

    /// Current access token, refreshing through the stored refresh token
    /// when the old one is expired or about to expire.
    pub async fn get_valid_access_token(&self, user_id: &str, kind: GoogleKind) -> Result<String> {
        let config = self.integration_config(user_id, kind).await?;
        let token = self.extract_stored_token(&config);

        if let Some(access) = token.access_token.as_deref() {
            if !is_expired(token.expires_at.as_deref()) {
                return Ok(access.to_string());
            }
        }

        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            anyhow!(
                "no valid {} token, connect via /integrations connect {}",
                kind.as_str(),
                kind.as_str()
            )
        })?;
        let refreshed = self.refresh_access_token(&refresh_token).await?;
        let access = refreshed
            .access_token
            .clone()
            .ok_or_else(|| anyhow!("oauth refresh did not return an access token"))?;
        self.save_token(user_id, kind, refreshed, Some(token)).await?;
        Ok(access)
    }

    /// Best-effort revoke at Google; the caller decides whether a failed
    /// revoke blocks the local disconnect.
    pub async fn revoke_integration_tokens(&self, user_id: &str, kind: GoogleKind) -> Result<()> {
        let config = self.integration_config(user_id, kind).await?;
        let token = self.extract_stored_token(&config);
        let revocable = token.refresh_token.or(token.access_token);
        let revocable = match revocable {
            Some(value) => value,
            None => return Ok(()),
        };

        let response = self
            .http
            .post(&self.config.revoke_endpoint)
            .form(&[("token", revocable.as_str())])
            .send()
            .await
            .context("google token revoke request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("google token revoke failed ({})", response.status()));
        }
        Ok(())
    }

    async fn save_token(
        &self,
        user_id: &str,
        kind: GoogleKind,
        response: GoogleTokenResponse,
        previous: Option<StoredGoogleToken>,
    ) -> Result<()> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| anyhow!("token encryption key is required for oauth token storage"))?;

        let existing_config = self
            .store
            .get_integration(user_id, kind.as_str())
            .await?
            .map(|connection| connection.config)
            .unwrap_or_else(|| json!({}));
        let previous = previous.unwrap_or_else(|| self.extract_stored_token(&existing_config));

        let expires_at = Utc::now() + Duration::seconds(response.expires_in.unwrap_or(3600));
        let merged = StoredGoogleToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous.refresh_token),
            expires_at: Some(expires_at.to_rfc3339()),
            token_type: response
                .token_type
                .or(previous.token_type)
                .or_else(|| Some("Bearer".to_string())),
            scope: response.scope.or(previous.scope),
        };
        let encrypted = cipher.encrypt(&serde_json::to_string(&merged)?)?;

        let mut config = existing_config;
        if !config.is_object() {
            config = json!({});
        }
        if let Some(map) = config.as_object_mut() {
            map.insert("enabled".to_string(), Value::Bool(true));
            map.insert("tokenEncrypted".to_string(), Value::String(encrypted));
            map.insert(
                "connectedAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            // Replaced by tokenEncrypted; never keep the plaintext form.
            map.remove("token");
            if kind == GoogleKind::Calendar
                && !map.get("calendarId").map(Value::is_string).unwrap_or(false)
            {
                map.insert(
                    "calendarId".to_string(),
                    Value::String(self.default_calendar_id.clone()),
                );
            }
        }

        self.store
            .upsert_integration(user_id, kind.as_str(), "google", &config)
            .await
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<GoogleTokenResponse> {
        let redirect_uri = self.config.resolved_redirect_uri();
        let params = [
            ("code", code),
            ("client_id", self.config.google_client_id.as_str()),
            ("client_secret", self.config.google_client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&params, "google token exchange").await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<GoogleTokenResponse> {
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.config.google_client_id.as_str()),
            ("client_secret", self.config.google_client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        self.token_request(&params, "google token refresh").await
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> Result<GoogleTokenResponse> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(params)
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!("{what} failed ({})", response.status()));
        }
        response
            .json()
            .await
            .with_context(|| format!("{what} returned malformed JSON"))
    }

    async fn integration_config(&self, user_id: &str, kind: GoogleKind) -> Result<Value> {
        Ok(self
            .store
            .get_integration(user_id, kind.as_str())
            .await?
            .map(|connection| connection.config)
            .unwrap_or_else(|| json!({})))
    }

    /// Decrypt the stored token blob; a legacy plaintext `token` object is
    /// still readable, but any write re-encrypts.
    fn extract_stored_token(&self, config: &Value) -> StoredGoogleToken {
        if let Some(encrypted) = config.get("tokenEncrypted").and_then(Value::as_str) {
            if !encrypted.is_empty() {
                let decrypted = self
                    .cipher
                    .as_ref()
                    .and_then(|cipher| cipher.decrypt(encrypted).ok());
                if let Some(plaintext) = decrypted {
                    if let Ok(token) = serde_json::from_str(&plaintext) {
                        return token;
                    }
                }
                return StoredGoogleToken::default();
            }
        }
        config
            .get("token")
            .and_then(|legacy| serde_json::from_value(legacy.clone()).ok())
            .unwrap_or_default()
    }

    async fn peek_state(&self, state: &str) -> Result<Option<OAuthState>> {
        let raw = self.kv.get(&state_key(state)).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    // Single-use by construction: GETDEL hands the record to exactly one
    // caller, so a replayed callback never reaches the token exchange.
    async fn consume_state(&self, state: &str) -> Result<Option<OAuthState>> {
        let raw = self.kv.get_del(&state_key(state)).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }
}

fn state_key(state: &str) -> String {
    format!("oauth:google:state:{state}")
}

/// Expired (or unknown) one minute before the recorded deadline, so a
/// token is never used in its final seconds.
fn is_expired(expires_at: Option<&str>) -> bool {
    let Some(raw) = expires_at else {
        return true;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(deadline) => Utc::now() >= deadline.with_timezone(&Utc) - Duration::seconds(60),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_only_known_values() {
        assert_eq!(GoogleKind::parse("calendar"), Some(GoogleKind::Calendar));
        assert_eq!(GoogleKind::parse("gmail"), Some(GoogleKind::Gmail));
        assert_eq!(GoogleKind::parse("drive"), None);
    }

    #[test]
    fn missing_or_malformed_expiry_counts_as_expired() {
        assert!(is_expired(None));
        assert!(is_expired(Some("not-a-timestamp")));
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        assert!(!is_expired(Some(&future)));
        // Inside the 60s safety margin counts as expired.
        let soon = (Utc::now() + Duration::seconds(10)).to_rfc3339();
        assert!(is_expired(Some(&soon)));
    }
}
