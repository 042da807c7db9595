use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::storage::{HeartbeatJob, RelationalStore};

pub const MORNING_BRIEFING: &str = "morning_briefing";
pub const WEEKLY_REVIEW: &str = "weekly_review";

pub const MORNING_SCHEDULE: &str = "0 7 * * *";
pub const WEEKLY_SCHEDULE: &str = "0 18 * * SUN";

/// The /heartbeats command surface: list job state and flip the two
/// built-in jobs on or off. Schedules are fixed; the owner's profile
/// timezone decides when they fire.
pub struct HeartbeatConfigService {
    store: Arc<dyn RelationalStore>,
}

impl HeartbeatConfigService {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    pub async fn handle_command(&self, user_id: &str, text: &str) -> Result<String> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() == 1 {
            return self.list(user_id).await;
        }

        let kind = parts.get(1).map(|part| part.to_lowercase());
        let state = parts.get(2).map(|part| part.to_lowercase());
        let (job_type, schedule) = match kind.as_deref() {
            Some("morning") => (MORNING_BRIEFING, MORNING_SCHEDULE),
            Some("weekly") => (WEEKLY_REVIEW, WEEKLY_SCHEDULE),
            _ => return Ok(help_text()),
        };
        let enabled = match state.as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => return Ok(help_text()),
        };

        let timezone = self
            .store
            .get_timezone(user_id)
            .await?
            .unwrap_or_else(|| "UTC".to_string());
        self.store
            .upsert_heartbeat(&HeartbeatJob {
                owner_user_id: user_id.to_string(),
                job_type: job_type.to_string(),
                schedule_cron: schedule.to_string(),
                timezone,
                enabled,
                config: json!({}),
            })
            .await?;

        let kind_word = if job_type == MORNING_BRIEFING {
            "morning"
        } else {
            "weekly"
        };
        Ok(format!(
            "{kind_word} heartbeat {}.",
            if enabled { "enabled" } else { "disabled" }
        ))
    }

    pub async fn list(&self, user_id: &str) -> Result<String> {
        let jobs = self.store.list_heartbeats(user_id).await?;
        let describe = |job_type: &str, default_schedule: &str| {
            let job = jobs.iter().find(|job| job.job_type == job_type);
            let enabled = job.map(|job| job.enabled).unwrap_or(false);
            let schedule = job
                .map(|job| job.schedule_cron.as_str())
                .unwrap_or(default_schedule);
            (
                if enabled { "enabled" } else { "disabled" },
                schedule.to_string(),
            )
        };

        let (morning_state, morning_schedule) = describe(MORNING_BRIEFING, MORNING_SCHEDULE);
        let (weekly_state, weekly_schedule) = describe(WEEKLY_REVIEW, WEEKLY_SCHEDULE);
        Ok([
            "Heartbeats:".to_string(),
            format!("- Morning briefing: {morning_state} ({morning_schedule})"),
            format!("- Weekly review: {weekly_state} ({weekly_schedule})"),
            String::new(),
            "Commands:".to_string(),
            "/heartbeats".to_string(),
            "/heartbeats morning on".to_string(),
            "/heartbeats morning off".to_string(),
            "/heartbeats weekly on".to_string(),
            "/heartbeats weekly off".to_string(),
        ]
        .join("\n"))
    }
}

fn help_text() -> String {
    [
        "Heartbeat commands:",
        "/heartbeats",
        "/heartbeats morning on|off",
        "/heartbeats weekly on|off",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn toggling_creates_a_job_with_the_default_schedule() {
        let store = Arc::new(MemoryStore::new());
        let service = HeartbeatConfigService::new(store.clone());

        let reply = service.handle_command("u1", "/heartbeats morning on").await.unwrap();
        assert_eq!(reply, "morning heartbeat enabled.");

        let jobs = store.list_heartbeats("u1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, MORNING_BRIEFING);
        assert_eq!(jobs[0].schedule_cron, MORNING_SCHEDULE);
        assert!(jobs[0].enabled);

        let reply = service.handle_command("u1", "/heartbeats morning off").await.unwrap();
        assert_eq!(reply, "morning heartbeat disabled.");
        let jobs = store.list_heartbeats("u1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);
    }

    #[tokio::test]
    async fn timezone_comes_from_the_profile() {
        let store = Arc::new(MemoryStore::new());
        store.set_timezone("u1", "Europe/Lisbon");
        let service = HeartbeatConfigService::new(store.clone());
        service.handle_command("u1", "/heartbeats weekly on").await.unwrap();
        let jobs = store.list_heartbeats("u1").await.unwrap();
        assert_eq!(jobs[0].timezone, "Europe/Lisbon");
    }

    #[tokio::test]
    async fn bad_arguments_print_help() {
        let store = Arc::new(MemoryStore::new());
        let service = HeartbeatConfigService::new(store);
        for text in ["/heartbeats nightly on", "/heartbeats morning maybe", "/heartbeats morning"] {
            let reply = service.handle_command("u1", text).await.unwrap();
            assert!(reply.starts_with("Heartbeat commands:"), "{text}");
        }
    }

    #[tokio::test]
    async fn bare_command_lists_defaults() {
        let store = Arc::new(MemoryStore::new());
        let service = HeartbeatConfigService::new(store);
        let reply = service.handle_command("u1", "/heartbeats").await.unwrap();
        assert!(reply.contains("- Morning briefing: disabled (0 7 * * *)"));
        assert!(reply.contains("- Weekly review: disabled (0 18 * * SUN)"));
    }
}
