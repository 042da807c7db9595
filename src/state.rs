// Global wiring: builds every store, client and service once and hands
// out shared handles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::heartbeat::{BriefingService, HeartbeatScheduler};
use crate::integrations::{CalendarClient, GmailClient, WeatherClient};
use crate::kv::{build_kv, KeyValueStore};
use crate::llm::{LlmClient, ModelBackend};
use crate::services::{
    AgentService, ConfirmationService, ConversationMemory, GoogleOAuthService,
    HeartbeatConfigService, IntegrationService, OwnershipService, RateLimiter,
};
use crate::storage::{build_storage, RelationalStore};
use crate::telegram::{TelegramClient, Transport, UpdatePoller, UpdateRouter};
use crate::tools::ToolExecutor;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RelationalStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub transport: Arc<dyn Transport>,
    pub ownership: Arc<OwnershipService>,
    pub oauth: Arc<GoogleOAuthService>,
    pub poller: Arc<UpdatePoller>,
    pub scheduler: Arc<HeartbeatScheduler>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;

        let kv = build_kv(&config.kv, http.clone())?;
        let store = build_storage(&config.storage)?;
        let limiter = Arc::new(RateLimiter::new(kv.clone()));

        let telegram = Arc::new(TelegramClient::new(http.clone(), &config.telegram));
        let transport: Arc<dyn Transport> = telegram.clone();

        let ownership = Arc::new(OwnershipService::new(
            store.clone(),
            limiter.clone(),
            config.owner.clone(),
            config.llm.model.clone(),
        ));
        let oauth = Arc::new(GoogleOAuthService::new(
            store.clone(),
            kv.clone(),
            http.clone(),
            config.oauth.clone(),
            config.integrations.google_calendar_id.clone(),
        ));
        let integrations = Arc::new(IntegrationService::new(
            store.clone(),
            oauth.clone(),
            limiter,
            config.integrations.clone(),
            config.oauth.clone(),
        ));

        let weather = Arc::new(WeatherClient::new(
            http.clone(),
            config.integrations.weather_api_base.clone(),
            config.integrations.openweather_api_key.clone(),
        ));
        let calendar = Arc::new(CalendarClient::new(
            http.clone(),
            config.integrations.calendar_api_base.clone(),
            oauth.clone(),
        ));
        let gmail = Arc::new(GmailClient::new(
            http.clone(),
            config.integrations.gmail_api_base.clone(),
            oauth.clone(),
        ));

        let executor = Arc::new(ToolExecutor::new(
            store.clone(),
            integrations.clone(),
            weather.clone(),
            calendar.clone(),
            gmail.clone(),
        ));
        let model: Arc<dyn ModelBackend> = Arc::new(LlmClient::new(http, config.llm.clone()));
        let agent = Arc::new(AgentService::new(
            ConfirmationService::new(kv.clone(), config.agent.confirmation_ttl_s),
            ConversationMemory::new(
                kv.clone(),
                config.agent.conversation_window,
                config.agent.conversation_ttl_s,
            ),
            model,
            executor,
            store.clone(),
        ));

        let heartbeat_config = Arc::new(HeartbeatConfigService::new(store.clone()));
        let router = Arc::new(UpdateRouter::new(
            transport.clone(),
            ownership.clone(),
            agent,
            integrations.clone(),
            heartbeat_config,
        ));
        let poller = Arc::new(UpdatePoller::new(
            telegram,
            router,
            kv.clone(),
            config.telegram.poll_timeout_s,
            config.telegram.poll_retry_ms,
        ));

        let briefings = Arc::new(BriefingService::new(
            integrations,
            weather,
            calendar,
            gmail,
            store.clone(),
            config.integrations.heartbeat_max_emails,
        ));
        let scheduler = Arc::new(HeartbeatScheduler::new(
            store.clone(),
            kv.clone(),
            transport.clone(),
            briefings,
            config.heartbeat.clone(),
        ));

        Ok(Self {
            config,
            store,
            kv,
            transport,
            ownership,
            oauth,
            poller,
            scheduler,
        })
    }
}
