use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use hearth_server::config::OAuthConfig;
use hearth_server::kv::{KeyValueStore, MemoryKv};
use hearth_server::security::TokenCipher;
use hearth_server::services::{GoogleKind, GoogleOAuthService};
use hearth_server::storage::{MemoryStore, RelationalStore};
use serde_json::{json, Value};
use url::Url;

async fn token_endpoint(State(counter): State<Arc<AtomicUsize>>) -> Json<Value> {
    let calls = counter.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("at-{calls}"),
        "refresh_token": "rt-1",
        "expires_in": 3600,
        "token_type": "Bearer",
        "scope": "test",
    }))
}

async fn revoke_endpoint() -> &'static str {
    "ok"
}

/// Local stand-in for Google's token/revoke endpoints.
async fn spawn_token_server() -> (String, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .route("/revoke", post(revoke_endpoint))
        .with_state(counter.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), counter)
}

fn oauth_config(base: &str) -> OAuthConfig {
    OAuthConfig {
        public_base_url: "https://bot.example.com".to_string(),
        google_client_id: "client-id".to_string(),
        google_client_secret: "client-secret".to_string(),
        token_encryption_key: "test-key-material".to_string(),
        token_endpoint: format!("{base}/token"),
        revoke_endpoint: format!("{base}/revoke"),
        ..OAuthConfig::default()
    }
}

fn build_service(
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKv>,
    config: OAuthConfig,
) -> GoogleOAuthService {
    GoogleOAuthService::new(
        store,
        kv,
        reqwest::Client::new(),
        config,
        "primary".to_string(),
    )
}

fn state_param(connect_url: &str) -> String {
    let url = Url::parse(connect_url).unwrap();
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.to_string())
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_callback_stores_an_encrypted_token_once() {
    let (base, _) = spawn_token_server().await;
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKv::new());
    let service = build_service(store.clone(), kv, oauth_config(&base));

    let connect_url = service
        .create_connect_url("100", GoogleKind::Calendar)
        .await
        .unwrap();
    assert!(connect_url.starts_with("https://bot.example.com/oauth/google/start?state="));
    let state = state_param(&connect_url);

    // The consent URL exists while the state is parked and carries PKCE.
    let auth_url = service
        .build_auth_url_for_state(&state)
        .await
        .unwrap()
        .unwrap();
    let parsed = Url::parse(&auth_url).unwrap();
    let has = |key: &str| parsed.query_pairs().any(|(k, _)| k == key);
    assert!(has("code_challenge"));
    assert!(has("code_challenge_method"));
    assert!(has("state"));
    assert!(auth_url.contains("access_type=offline"));

    let (user_id, kind) = service.handle_callback(&state, "auth-code").await.unwrap();
    assert_eq!(user_id, "100");
    assert_eq!(kind, GoogleKind::Calendar);

    let stored = store
        .get_integration("100", "calendar")
        .await
        .unwrap()
        .unwrap();
    let sealed = stored
        .config
        .get("tokenEncrypted")
        .and_then(Value::as_str)
        .unwrap();
    assert!(sealed.starts_with("v1."));
    assert!(stored.config.get("token").is_none());
    assert_eq!(stored.config.get("enabled"), Some(&Value::Bool(true)));
    assert_eq!(
        stored.config.get("calendarId").and_then(Value::as_str),
        Some("primary")
    );

    // The state is single use: a replayed callback cannot exchange again.
    assert!(service.handle_callback(&state, "auth-code").await.is_err());
    // And the consent URL for it is gone too.
    assert!(service
        .build_auth_url_for_state(&state)
        .await
        .unwrap()
        .is_none());

    let access = service
        .get_valid_access_token("100", GoogleKind::Calendar)
        .await
        .unwrap();
    assert_eq!(access, "at-1");
}

/// Yields after every read-like operation so two concurrent callers both
/// reach the state lookup before either moves on.
struct LaggyKv {
    inner: MemoryKv,
}

#[async_trait]
impl KeyValueStore for LaggyKv {
    async fn set_nx(&self, key: &str, value: &str, ttl_s: u64) -> Result<bool> {
        self.inner.set_nx(key, value, ttl_s).await
    }

    async fn set(&self, key: &str, value: &str, ttl_s: Option<u64>) -> Result<()> {
        self.inner.set(key, value, ttl_s).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.inner.get(key).await?;
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let value = self.inner.get_del(key).await?;
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        Ok(value)
    }

    async fn incr_with_expiry(&self, key: &str, window_s: u64) -> Result<i64> {
        self.inner.incr_with_expiry(key, window_s).await
    }

    async fn list_push(&self, key: &str, value: &str, keep_last: i64, ttl_s: u64) -> Result<()> {
        self.inner.list_push(key, value, keep_last, ttl_s).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.inner.list_range(key).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callback_replays_exchange_exactly_once() {
    let (base, counter) = spawn_token_server().await;
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(LaggyKv {
        inner: MemoryKv::new(),
    });
    let service = Arc::new(GoogleOAuthService::new(
        store,
        kv,
        reqwest::Client::new(),
        oauth_config(&base),
        "primary".to_string(),
    ));

    let connect_url = service
        .create_connect_url("100", GoogleKind::Calendar)
        .await
        .unwrap();
    let state = state_param(&connect_url);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = service.clone();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            service.handle_callback(&state, "auth-code").await.is_ok()
        }));
    }
    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    // Exactly one racer consumes the state; the other never reaches the
    // token endpoint.
    assert_eq!(successes, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_access_token_triggers_a_refresh() {
    let (base, counter) = spawn_token_server().await;
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKv::new());
    let config = oauth_config(&base);
    let service = build_service(store.clone(), kv, config.clone());

    let connect_url = service
        .create_connect_url("100", GoogleKind::Gmail)
        .await
        .unwrap();
    let state = state_param(&connect_url);
    service.handle_callback(&state, "auth-code").await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Rewind the stored expiry so the next lookup must refresh.
    let cipher = TokenCipher::from_key_material(&config.token_encryption_key).unwrap();
    let stored = store.get_integration("100", "gmail").await.unwrap().unwrap();
    let sealed = stored
        .config
        .get("tokenEncrypted")
        .and_then(Value::as_str)
        .unwrap();
    let mut token: Value = serde_json::from_str(&cipher.decrypt(sealed).unwrap()).unwrap();
    token["expiresAt"] = json!("2020-01-01T00:00:00Z");
    let mut config_json = stored.config.clone();
    config_json["tokenEncrypted"] = json!(cipher.encrypt(&token.to_string()).unwrap());
    store
        .upsert_integration("100", "gmail", "google", &config_json)
        .await
        .unwrap();

    let access = service
        .get_valid_access_token("100", GoogleKind::Gmail)
        .await
        .unwrap();
    assert_eq!(access, "at-2");
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // The refreshed token is persisted, so the next lookup skips the wire.
    let access = service
        .get_valid_access_token("100", GoogleKind::Gmail)
        .await
        .unwrap();
    assert_eq!(access, "at-2");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn legacy_plaintext_token_is_still_readable() {
    let (base, _) = spawn_token_server().await;
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKv::new());
    let service = build_service(store.clone(), kv, oauth_config(&base));

    store
        .upsert_integration(
            "100",
            "calendar",
            "google",
            &json!({
                "token": {
                    "accessToken": "legacy-token",
                    "expiresAt": "2099-01-01T00:00:00Z",
                },
                "enabled": true,
            }),
        )
        .await
        .unwrap();

    let access = service
        .get_valid_access_token("100", GoogleKind::Calendar)
        .await
        .unwrap();
    assert_eq!(access, "legacy-token");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn revoke_without_stored_tokens_is_a_no_op() {
    let (base, _) = spawn_token_server().await;
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKv::new());
    let service = build_service(store, kv, oauth_config(&base));

    service
        .revoke_integration_tokens("100", GoogleKind::Gmail)
        .await
        .unwrap();
}
