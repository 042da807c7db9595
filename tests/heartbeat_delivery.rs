use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hearth_server::config::{HeartbeatConfig, IntegrationsConfig, OAuthConfig};
use hearth_server::heartbeat::{BriefingService, HeartbeatScheduler};
use hearth_server::integrations::{CalendarClient, GmailClient, WeatherClient};
use hearth_server::kv::MemoryKv;
use hearth_server::services::heartbeat_config::{MORNING_BRIEFING, WEEKLY_REVIEW};
use hearth_server::services::{GoogleOAuthService, IntegrationService, RateLimiter};
use hearth_server::storage::{HeartbeatJob, MemoryStore, RelationalStore};
use hearth_server::telegram::Transport;
use parking_lot::Mutex;
use serde_json::json;

struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct Harness {
    transport: Arc<RecordingTransport>,
    scheduler: HeartbeatScheduler,
}

fn build_harness(store: Arc<MemoryStore>) -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let http = reqwest::Client::new();
    let transport = Arc::new(RecordingTransport::new());

    let oauth = Arc::new(GoogleOAuthService::new(
        store.clone(),
        kv.clone(),
        http.clone(),
        OAuthConfig::default(),
        "primary".to_string(),
    ));
    let integrations = Arc::new(IntegrationService::new(
        store.clone(),
        oauth.clone(),
        Arc::new(RateLimiter::new(kv.clone())),
        IntegrationsConfig::default(),
        OAuthConfig::default(),
    ));
    // Unconfigured clients: every briefing section degrades to its
    // placeholder line without touching the network.
    let briefings = Arc::new(BriefingService::new(
        integrations,
        Arc::new(WeatherClient::new(
            http.clone(),
            "http://127.0.0.1:9".to_string(),
            String::new(),
        )),
        Arc::new(CalendarClient::new(
            http.clone(),
            "http://127.0.0.1:9".to_string(),
            oauth.clone(),
        )),
        Arc::new(GmailClient::new(
            http,
            "http://127.0.0.1:9".to_string(),
            oauth,
        )),
        store.clone(),
        5,
    ));
    let scheduler = HeartbeatScheduler::new(
        store,
        kv,
        transport.clone(),
        briefings,
        HeartbeatConfig::default(),
    );
    Harness {
        transport,
        scheduler,
    }
}

fn always_due_job(user_id: &str, job_type: &str) -> HeartbeatJob {
    HeartbeatJob {
        owner_user_id: user_id.to_string(),
        job_type: job_type.to_string(),
        schedule_cron: "* * * * *".to_string(),
        timezone: "UTC".to_string(),
        enabled: true,
        config: json!({}),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn due_job_sends_one_briefing_per_slot() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_heartbeat(&always_due_job("100", MORNING_BRIEFING))
        .await
        .unwrap();
    let harness = build_harness(store);

    let minute_before = Utc::now().format("%H:%M").to_string();
    harness.scheduler.run_job_type(MORNING_BRIEFING).await.unwrap();
    harness.scheduler.run_job_type(MORNING_BRIEFING).await.unwrap();
    let minute_after = Utc::now().format("%H:%M").to_string();

    let sent = harness.transport.sent();
    assert!(!sent.is_empty());
    if minute_before == minute_after {
        // Same slot, so the second tick was deduplicated.
        assert_eq!(sent.len(), 1);
    }
    assert_eq!(sent[0].0, "100");
    assert!(sent[0].1.contains("Good morning. Briefing for"));
    assert!(sent[0].1.contains("Weather unavailable."));
    assert!(sent[0].1.contains("Calendar unavailable."));
    // Gmail was never connected, so no gmail section at all.
    assert!(!sent[0].1.contains("Gmail"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn weekly_review_uses_its_own_title() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_heartbeat(&always_due_job("100", WEEKLY_REVIEW))
        .await
        .unwrap();
    let harness = build_harness(store);

    harness.scheduler.run_job_type(WEEKLY_REVIEW).await.unwrap();
    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Weekly review for"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_and_off_schedule_jobs_send_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut disabled = always_due_job("100", MORNING_BRIEFING);
    disabled.enabled = false;
    store.upsert_heartbeat(&disabled).await.unwrap();

    // An enabled job pinned to a minute half an hour away from now.
    let minute = chrono::Timelike::minute(&Utc::now());
    let other_minute = (minute + 30) % 60;
    let mut off_schedule = always_due_job("200", MORNING_BRIEFING);
    off_schedule.schedule_cron = format!("{other_minute} * * * *");
    store.upsert_heartbeat(&off_schedule).await.unwrap();

    let harness = build_harness(store);
    harness.scheduler.run_job_type(MORNING_BRIEFING).await.unwrap();
    assert!(harness.transport.sent().is_empty());
}
