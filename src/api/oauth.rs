use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartParams {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
}

/// Redirect a short connect link to the full Google consent URL.
pub async fn start(
    State(app): State<Arc<AppState>>,
    Query(params): Query<StartParams>,
) -> Response {
    let Some(state) = params.state.filter(|value| !value.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing state").into_response();
    };

    match app.oauth.build_auth_url_for_state(&state).await {
        Ok(Some(url)) => Redirect::temporary(&url).into_response(),
        Ok(None) => (StatusCode::BAD_REQUEST, "Invalid or expired OAuth state").into_response(),
        Err(error) => {
            tracing::error!(%error, "oauth start failed");
            failure_page()
        }
    }
}

/// Google redirects back here. Exchanges the code, stores the encrypted
/// token and pings the user on Telegram.
pub async fn callback(
    State(app): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        let body = format!("<h1>OAuth denied</h1><p>{}</p>", escape_html(&error));
        return (StatusCode::BAD_REQUEST, page(&body)).into_response();
    }
    let (Some(state), Some(code)) = (params.state, params.code) else {
        return (StatusCode::BAD_REQUEST, "Missing state or code").into_response();
    };

    match app.oauth.handle_callback(&state, &code).await {
        Ok((user_id, kind)) => {
            let note = format!(
                "Google {} connected. You can now use it from chat.",
                kind.as_str()
            );
            if let Err(error) = app.transport.send_message(&user_id, &note).await {
                tracing::warn!(%error, "failed to notify user about oauth success");
            }
            let body = format!(
                "<h1>Connected</h1><p>Google {} is now connected. You can return to \
                 Telegram.</p>",
                escape_html(kind.as_str())
            );
            page(&body).into_response()
        }
        Err(error) => {
            tracing::error!(%error, "oauth callback failed");
            failure_page()
        }
    }
}

fn failure_page() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        page("<h1>OAuth failed</h1><p>Unexpected error occurred. Return to Telegram and try again.</p>"),
    )
        .into_response()
}

fn page(body: &str) -> Html<String> {
    Html(format!("<!doctype html><html><body>{body}</body></html>"))
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_markup_characters() {
        assert_eq!(
            escape_html("<script>\"&'"),
            "&lt;script&gt;&quot;&amp;&#39;"
        );
    }
}
