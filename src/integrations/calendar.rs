use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use crate::services::google_oauth::{GoogleKind, GoogleOAuthService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarRange {
    Today,
    Tomorrow,
}

impl CalendarRange {
    pub fn parse(value: &str) -> Self {
        if value == "tomorrow" {
            CalendarRange::Tomorrow
        } else {
            CalendarRange::Today
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CalendarRange::Today => "today",
            CalendarRange::Tomorrow => "tomorrow",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<EventDateTime>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

/// Google Calendar v3 client. Day boundaries are computed in the supplied
/// timezone so "today" means the owner's today, not the server's.
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
    oauth: Arc<GoogleOAuthService>,
}

impl CalendarClient {
    pub fn new(http: reqwest::Client, base_url: String, oauth: Arc<GoogleOAuthService>) -> Self {
        Self {
            http,
            base_url,
            oauth,
        }
    }

    pub async fn list_events(
        &self,
        user_id: &str,
        range: CalendarRange,
        calendar_id: &str,
        tz: Tz,
    ) -> Result<String> {
        let token = self
            .oauth
            .get_valid_access_token(user_id, GoogleKind::Calendar)
            .await?;
        let (start, end) = day_bounds(Utc::now(), tz, range);

        let response = self
            .http
            .get(self.events_url(calendar_id))
            .bearer_auth(&token)
            .query(&[
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                (
                    "timeMin",
                    start.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
                ),
                (
                    "timeMax",
                    end.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
                ),
            ])
            .send()
            .await
            .context("calendar list request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "calendar list request failed ({})",
                response.status()
            ));
        }
        let body: EventsResponse = response
            .json()
            .await
            .context("calendar list response was malformed JSON")?;

        if body.items.is_empty() {
            return Ok(format!("No calendar events {}.", range.label()));
        }
        let mut lines = vec![format!("Calendar {}:", range.label())];
        for event in &body.items {
            lines.push(format!(
                "- {}: {}",
                format_event_time(event.start.as_ref(), tz),
                event.summary.as_deref().unwrap_or("Untitled")
            ));
        }
        Ok(lines.join("\n"))
    }

    pub async fn create_event(
        &self,
        user_id: &str,
        title: &str,
        when_iso: &str,
        calendar_id: &str,
        duration_minutes: i64,
        location: Option<&str>,
        tz: Tz,
    ) -> Result<String> {
        let token = self
            .oauth
            .get_valid_access_token(user_id, GoogleKind::Calendar)
            .await?;
        let start = DateTime::parse_from_rfc3339(when_iso)
            .map_err(|_| anyhow!("invalid event time, use an ISO timestamp"))?
            .with_timezone(&Utc);
        let end = start + Duration::minutes(duration_minutes.max(1));

        let mut body = json!({
            "summary": title,
            "start": { "dateTime": start.to_rfc3339_opts(SecondsFormat::Secs, true) },
            "end": { "dateTime": end.to_rfc3339_opts(SecondsFormat::Secs, true) },
        });
        if let Some(location) = location {
            body["location"] = json!(location);
        }

        let response = self
            .http
            .post(self.events_url(calendar_id))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("calendar create request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "calendar create request failed ({})",
                response.status()
            ));
        }
        let created: CalendarEvent = response
            .json()
            .await
            .context("calendar create response was malformed JSON")?;
        Ok(format!(
            "Created event \"{}\" at {}.",
            created.summary.as_deref().unwrap_or(title),
            format_event_time(created.start.as_ref(), tz)
        ))
    }

    fn events_url(&self, calendar_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(calendar_id.as_bytes()).collect();
        format!(
            "{}/calendar/v3/calendars/{}/events",
            self.base_url.trim_end_matches('/'),
            encoded
        )
    }
}

/// [midnight, next midnight) of today or tomorrow in `tz`, as UTC instants.
fn day_bounds(now: DateTime<Utc>, tz: Tz, range: CalendarRange) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_now = now.with_timezone(&tz);
    let mut day = local_now.date_naive();
    if range == CalendarRange::Tomorrow {
        if let Some(next) = day.succ_opt() {
            day = next;
        }
    }
    let start = tz
        .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now);
    let end_day = day.succ_opt().unwrap_or(day);
    let end = tz
        .from_local_datetime(&end_day.and_hms_opt(0, 0, 0).unwrap_or_default())
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(start + Duration::days(1));
    (start, end)
}

fn format_event_time(value: Option<&EventDateTime>, tz: Tz) -> String {
    let raw = value.and_then(|value| value.date_time.as_deref().or(value.date.as_deref()));
    let Some(raw) = raw else {
        return "unspecified time".to_string();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&tz).format("%b %-d, %-I:%M %p").to_string();
    }
    raw.to_string()
}
