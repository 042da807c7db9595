// HTTP surface: the OAuth redirect endpoints and a liveness probe. The
// bot itself talks to Telegram over long polling, not webhooks, so this
// router stays deliberately small.

mod oauth;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/oauth/google/start", get(oauth::start))
        .route("/oauth/google/callback", get(oauth::callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
