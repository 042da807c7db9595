//! Lightweight natural-language parsing for calendar event requests.
//!
//! This is deliberately rule-based: the agent only needs enough structure
//! to build a confirmation preview, and the user always sees the parse
//! before anything is written.

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeZone, Utc, Weekday};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCalendarEvent {
    pub title: String,
    pub when_iso: Option<String>,
    pub duration_minutes: i64,
    pub location: Option<String>,
}

pub fn parse_calendar_event_request(text: &str, now: DateTime<Utc>) -> ParsedCalendarEvent {
    ParsedCalendarEvent {
        title: parse_title(text),
        when_iso: parse_datetime_from_text(text, now),
        duration_minutes: parse_duration_minutes(text).unwrap_or(60),
        location: parse_location(text),
    }
}

/// Extract an event start time, preferring an explicit ISO-8601 timestamp
/// over `today`/`tomorrow`/weekday phrasing. Returns UTC in RFC 3339.
pub fn parse_datetime_from_text(text: &str, now: DateTime<Utc>) -> Option<String> {
    if let Some(iso) = find_iso_timestamp(text) {
        return Some(iso.to_rfc3339_opts(SecondsFormat::Secs, true));
    }

    let date = resolve_day(text, now)?;
    let (hour, minute) = resolve_time(text)?;
    let when = date.and_hms_opt(hour, minute, 0)?;
    Some(
        Utc.from_utc_datetime(&when)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn find_iso_timestamp(text: &str) -> Option<DateTime<Utc>> {
    // Scan for a YYYY-MM-DDTHH:MM prefix and let chrono validate the rest.
    let bytes = text.as_bytes();
    for (index, window) in bytes.windows(16).enumerate() {
        let looks_like_start = window[4] == b'-'
            && window[7] == b'-'
            && window[10] == b'T'
            && window[13] == b':'
            && window[..4].iter().all(u8::is_ascii_digit);
        if !looks_like_start {
            continue;
        }
        let tail = &text[index..];
        let end = tail
            .find(|c: char| c.is_whitespace())
            .unwrap_or(tail.len());
        let candidate = tail[..end].trim_end_matches(['.', ',']);
        if let Ok(parsed) = DateTime::parse_from_rfc3339(candidate) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

fn resolve_day(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let lower = text.to_ascii_lowercase();
    let today = now.date_naive();

    if contains_word(&lower, "today") {
        return Some(today);
    }
    if contains_word(&lower, "tomorrow") {
        return today.succ_opt();
    }

    const WEEKDAYS: [(&str, Weekday); 7] = [
        ("sunday", Weekday::Sun),
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
    ];
    for (name, weekday) in WEEKDAYS {
        if contains_word(&lower, name) {
            let current = today.weekday().num_days_from_sunday() as i64;
            let target = weekday.num_days_from_sunday() as i64;
            // Always the next occurrence, never today.
            let mut delta = (target - current).rem_euclid(7);
            if delta == 0 {
                delta = 7;
            }
            return Some(today + Duration::days(delta));
        }
    }

    find_plain_date(&lower)
}

fn find_plain_date(lower: &str) -> Option<NaiveDate> {
    let bytes = lower.as_bytes();
    for (index, window) in bytes.windows(10).enumerate() {
        if window[4] == b'-'
            && window[7] == b'-'
            && window[..4].iter().all(u8::is_ascii_digit)
            && window[5..7].iter().all(u8::is_ascii_digit)
            && window[8..].iter().all(u8::is_ascii_digit)
        {
            if let Ok(date) = NaiveDate::parse_from_str(&lower[index..index + 10], "%Y-%m-%d") {
                return Some(date);
            }
        }
    }
    None
}

fn resolve_time(text: &str) -> Option<(u32, u32)> {
    let lower = text.to_ascii_lowercase();

    if let Some(parsed) = find_meridiem_time(&lower) {
        return Some(parsed);
    }

    // 24-hour HH:MM form.
    for (index, _) in lower.match_indices(':') {
        let before: String = lower[..index]
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        let after: String = lower[index + 1..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if before.is_empty() || after.len() != 2 {
            continue;
        }
        if let (Ok(hour), Ok(minute)) = (before.parse::<u32>(), after.parse::<u32>()) {
            if hour <= 23 && minute <= 59 {
                return Some((hour, minute));
            }
        }
    }
    None
}

fn find_meridiem_time(lower: &str) -> Option<(u32, u32)> {
    for (index, _) in lower
        .match_indices("am")
        .chain(lower.match_indices("pm"))
        .collect::<Vec<_>>()
    {
        let is_pm = &lower[index..index + 2] == "pm";
        // Word boundary after the meridiem.
        if lower[index + 2..]
            .chars()
            .next()
            .map(|c| c.is_alphanumeric())
            .unwrap_or(false)
        {
            continue;
        }
        let head = lower[..index].trim_end();
        let digits: String = head
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit() || *c == ':')
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        if digits.is_empty() {
            continue;
        }
        let (raw_hour, minute) = match digits.split_once(':') {
            Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
            None => (digits.parse::<u32>().ok()?, 0),
        };
        if !(1..=12).contains(&raw_hour) || minute > 59 {
            continue;
        }
        let mut hour = raw_hour % 12;
        if is_pm {
            hour += 12;
        }
        return Some((hour, minute));
    }
    None
}

fn parse_duration_minutes(text: &str) -> Option<i64> {
    let lower = text.to_ascii_lowercase();
    let index = lower.find("for ")?;
    let tail = lower[index + 4..].trim_start();
    let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    let count: i64 = digits.parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit = tail[digits.len()..].trim_start();
    if unit.starts_with("hour") || unit.starts_with("hr") {
        Some(count * 60)
    } else if unit.starts_with("min") {
        Some(count)
    } else {
        None
    }
}

fn parse_location(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let marker = [" at ", " in "]
        .iter()
        .filter_map(|sep| lower.rfind(sep).map(|pos| pos + sep.len()))
        .max()?;
    let value = text[marker..].trim();
    if value.is_empty() || value.len() > 80 {
        return None;
    }
    let lowered = value.to_ascii_lowercase();
    // "at 2pm" is a time, not a place.
    if lowered.ends_with("am") || lowered.ends_with("pm") {
        return None;
    }
    if !value
        .chars()
        .next()
        .map(|c| c.is_alphanumeric())
        .unwrap_or(false)
    {
        return None;
    }
    Some(value.to_string())
}

fn parse_title(text: &str) -> String {
    let mut title = text.trim();
    for verb in ["add ", "create ", "schedule "] {
        let lower = title.to_ascii_lowercase();
        if lower.starts_with(verb) {
            title = title[verb.len()..].trim_start();
            break;
        }
    }

    let lower = title.to_ascii_lowercase();
    let mut cut = title.len();
    for word in [
        "today", "tomorrow", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
        "sunday",
    ] {
        if let Some(pos) = find_word(&lower, word) {
            cut = cut.min(pos);
        }
    }
    if let Some(pos) = lower.find(" for ") {
        cut = cut.min(pos);
    }
    let title = title[..cut].trim().trim_end_matches(',').trim();
    if title.is_empty() {
        "Calendar event".to_string()
    } else {
        title.to_string()
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    find_word(haystack, word).is_some()
}

fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();
        let boundary_before = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        let boundary_after = !haystack[end..]
            .chars()
            .next()
            .map(char::is_alphanumeric)
            .unwrap_or(false);
        if boundary_before && boundary_after {
            return Some(start);
        }
        from = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        // A Sunday.
        Utc.with_ymd_and_hms(2026, 2, 8, 9, 0, 0).unwrap()
    }

    #[test]
    fn parses_explicit_iso_timestamp() {
        let parsed = parse_datetime_from_text(
            "schedule dentist 2026-02-10T15:00:00-08:00",
            base(),
        );
        assert_eq!(parsed.as_deref(), Some("2026-02-10T23:00:00Z"));
    }

    #[test]
    fn parses_tomorrow_with_meridiem_time() {
        let parsed = parse_datetime_from_text("add standup tomorrow 2pm", base());
        assert_eq!(parsed.as_deref(), Some("2026-02-09T14:00:00Z"));
    }

    #[test]
    fn parses_noon_edge_cases() {
        assert_eq!(
            parse_datetime_from_text("lunch today 12pm", base()).as_deref(),
            Some("2026-02-08T12:00:00Z")
        );
        assert_eq!(
            parse_datetime_from_text("call today 12:30am", base()).as_deref(),
            Some("2026-02-08T00:30:00Z")
        );
    }

    #[test]
    fn weekday_resolves_to_next_occurrence_never_today() {
        // Base date is a Sunday; "sunday" means a week out.
        let parsed = parse_datetime_from_text("review sunday 9:00", base());
        assert_eq!(parsed.as_deref(), Some("2026-02-15T09:00:00Z"));
        let parsed = parse_datetime_from_text("review wednesday 9:00", base());
        assert_eq!(parsed.as_deref(), Some("2026-02-11T09:00:00Z"));
    }

    #[test]
    fn missing_time_means_no_datetime() {
        assert!(parse_datetime_from_text("add dinner tomorrow", base()).is_none());
        assert!(parse_datetime_from_text("add dinner at 7pm", base()).is_none());
    }

    #[test]
    fn full_event_request_parses() {
        let event = parse_calendar_event_request(
            "schedule team sync tomorrow 2pm for 45 minutes at HQ",
            base(),
        );
        assert_eq!(event.title, "team sync");
        assert_eq!(event.when_iso.as_deref(), Some("2026-02-09T14:00:00Z"));
        assert_eq!(event.duration_minutes, 45);
        assert_eq!(event.location.as_deref(), Some("HQ"));
    }

    #[test]
    fn duration_in_hours_converts_to_minutes() {
        let event = parse_calendar_event_request("create planning tomorrow 10am for 2 hours", base());
        assert_eq!(event.duration_minutes, 120);
    }

    #[test]
    fn title_falls_back_when_everything_is_stripped() {
        let event = parse_calendar_event_request("schedule tomorrow 2pm", base());
        assert_eq!(event.title, "Calendar event");
    }

    #[test]
    fn trailing_meridiem_is_not_a_location() {
        let event = parse_calendar_event_request("add review tomorrow at 2pm", base());
        assert!(event.location.is_none());
    }
}
