// Binary entrypoint: bootstrap storage, start the OAuth callback server
// and the heartbeat scheduler, then run the Telegram long poller until a
// shutdown signal arrives.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use hearth_server::config::{load_config, Config};
use hearth_server::shutdown::shutdown_signal;
use hearth_server::{api, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    init_tracing(&config);

    let state = Arc::new(AppState::new(config)?);
    state.store.ensure_initialized().await?;
    state.ownership.seed_claim_code().await?;

    // The HTTP listener only matters for OAuth redirects, but the health
    // probe is useful either way.
    let app = api::build_router(state.clone());
    let addr = bind_address(&state.config);
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("http server listening on http://{addr}");
    let http_server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
        if let Err(err) = server.await {
            warn!("http server exited abnormally: {err}");
        }
    });

    if state.config.heartbeat.enabled {
        let scheduler = state.scheduler.clone();
        tokio::spawn(async move { scheduler.run().await });
    } else {
        info!("heartbeat scheduler disabled by config");
    }

    let poller = state.poller.clone();
    let poll_task = tokio::spawn(async move { poller.run().await });

    shutdown_signal().await;
    state.poller.stop();
    let _ = poll_task.await;
    let _ = http_server.await;

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = config.observability.log_level.trim();
    let default_level = if default_level.is_empty() {
        "info".to_string()
    } else {
        default_level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn bind_address(config: &Config) -> String {
    // Environment overrides keep container deployments simple.
    let host = std::env::var("HEARTH_HOST").unwrap_or_else(|_| config.server.host.clone());
    let port = std::env::var("HEARTH_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.server.port);
    format!("{host}:{port}")
}
