//! Scheduled heartbeat delivery: a per-minute tick walks the enabled jobs,
//! matches their cron expressions in the owner's timezone and sends a
//! briefing at most once per slot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::config::HeartbeatConfig;
use crate::cron_lite::{heartbeat_slot_key, should_run_cron_now};
use crate::integrations::{CalendarClient, CalendarRange, GmailClient, WeatherClient};
use crate::kv::KeyValueStore;
use crate::services::heartbeat_config::{MORNING_BRIEFING, WEEKLY_REVIEW};
use crate::services::integrations::IntegrationService;
use crate::storage::RelationalStore;
use crate::telegram::Transport;

/// Composes briefing text from the integration clients. Every section
/// degrades to a placeholder line instead of failing the whole briefing.
pub struct BriefingService {
    integrations: Arc<IntegrationService>,
    weather: Arc<WeatherClient>,
    calendar: Arc<CalendarClient>,
    gmail: Arc<GmailClient>,
    store: Arc<dyn RelationalStore>,
    max_emails: i64,
}

impl BriefingService {
    pub fn new(
        integrations: Arc<IntegrationService>,
        weather: Arc<WeatherClient>,
        calendar: Arc<CalendarClient>,
        gmail: Arc<GmailClient>,
        store: Arc<dyn RelationalStore>,
        max_emails: i64,
    ) -> Self {
        Self {
            integrations,
            weather,
            calendar,
            gmail,
            store,
            max_emails,
        }
    }

    pub async fn build(&self, user_id: &str, job_type: &str) -> Result<String> {
        let today = Utc::now().format("%-m/%-d/%Y");
        let mut lines = vec![if job_type == MORNING_BRIEFING {
            format!("Good morning. Briefing for {today}")
        } else {
            format!("Weekly review for {today}")
        }];

        let location = self.integrations.get_weather_location(user_id).await?;
        match self.weather.forecast(&location, 1).await {
            Ok(text) => push_section(&mut lines, text),
            Err(error) => {
                tracing::debug!(%error, "briefing weather section failed");
                push_section(&mut lines, "Weather unavailable.".to_string());
            }
        }

        let range = if job_type == MORNING_BRIEFING {
            CalendarRange::Today
        } else {
            CalendarRange::Tomorrow
        };
        match self.calendar_section(user_id, range).await {
            Ok(text) => push_section(&mut lines, text),
            Err(error) => {
                tracing::debug!(%error, "briefing calendar section failed");
                push_section(&mut lines, "Calendar unavailable.".to_string());
            }
        }

        if self.integrations.is_gmail_enabled(user_id).await? {
            match self.gmail.important_summary(user_id, self.max_emails).await {
                Ok(text) => push_section(&mut lines, text),
                Err(error) => {
                    tracing::debug!(%error, "briefing gmail section failed");
                    push_section(&mut lines, "Gmail unavailable.".to_string());
                }
            }
        }

        Ok(lines.join("\n"))
    }

    async fn calendar_section(&self, user_id: &str, range: CalendarRange) -> Result<String> {
        let calendar_id = self.integrations.get_calendar_id(user_id).await?;
        let tz = self
            .store
            .get_timezone(user_id)
            .await?
            .and_then(|name| name.parse().ok())
            .unwrap_or(chrono_tz::UTC);
        self.calendar
            .list_events(user_id, range, &calendar_id, tz)
            .await
    }
}

fn push_section(lines: &mut Vec<String>, text: String) {
    lines.push(String::new());
    lines.push(text);
}

pub struct HeartbeatScheduler {
    store: Arc<dyn RelationalStore>,
    kv: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    briefings: Arc<BriefingService>,
    config: HeartbeatConfig,
}

impl HeartbeatScheduler {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        kv: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        briefings: Arc<BriefingService>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            kv,
            transport,
            briefings,
            config,
        }
    }

    /// Tick forever. Slot keys make ticks idempotent, so overlapping
    /// replicas or a restart inside a minute never double-send.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            for job_type in [MORNING_BRIEFING, WEEKLY_REVIEW] {
                if let Err(error) = self.run_job_type(job_type).await {
                    tracing::error!(%error, job_type, "heartbeat tick failed");
                }
            }
        }
    }

    pub async fn run_job_type(&self, job_type: &str) -> Result<()> {
        let now = Utc::now();
        let jobs = self.store.enabled_heartbeats_by_type(job_type).await?;

        let mut sent = 0u32;
        let mut skipped_not_due = 0u32;
        let mut skipped_duplicate = 0u32;
        let mut failed = 0u32;

        for job in jobs {
            if !should_run_cron_now(&job.schedule_cron, &job.timezone, now) {
                skipped_not_due += 1;
                continue;
            }

            let slot_key = heartbeat_slot_key(job_type, &job.owner_user_id, &job.timezone, now);
            let reserved = self
                .kv
                .set_nx(&slot_key, "1", self.config.slot_ttl_s)
                .await?;
            if !reserved {
                skipped_duplicate += 1;
                continue;
            }

            match self.deliver(&job.owner_user_id, job_type).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    failed += 1;
                    tracing::error!(
                        %error,
                        user_id = %job.owner_user_id,
                        job_type,
                        "failed to send heartbeat"
                    );
                }
            }
        }

        if sent + skipped_duplicate + failed > 0 {
            tracing::info!(
                job_type,
                sent,
                skipped_not_due,
                skipped_duplicate,
                failed,
                "heartbeat tick completed"
            );
        }
        Ok(())
    }

    async fn deliver(&self, user_id: &str, job_type: &str) -> Result<()> {
        let message = self.briefings.build(user_id, job_type).await?;
        self.transport.send_message(user_id, &message).await
    }
}
