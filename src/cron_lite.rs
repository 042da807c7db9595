// Minimal 5-field cron matcher for heartbeat schedules.
//
// Only minute, hour and weekday participate in matching; the day-of-month
// and month fields are accepted but ignored. Weekday takes numbers
// (0 = Sunday, larger values wrap mod 7) or 3-letter names.
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

pub fn should_run_cron_now(cron: &str, timezone: &str, now: DateTime<Utc>) -> bool {
    let parts: Vec<&str> = cron.trim().split_whitespace().collect();
    if parts.len() != 5 {
        return false;
    }

    let Ok(tz) = timezone.parse::<Tz>() else {
        return false;
    };
    let local = now.with_timezone(&tz);

    matches_expr(parts[0], local.minute(), 0, 59)
        && matches_expr(parts[1], local.hour(), 0, 23)
        && matches_dow(parts[4], local.weekday().num_days_from_sunday())
}

/// Dedup key for one heartbeat delivery slot: identical for every call
/// within the same local minute, distinct across minute slots.
pub fn heartbeat_slot_key(
    job_type: &str,
    user_id: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> String {
    let tz = timezone.parse::<Tz>().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);
    format!(
        "heartbeat:{job_type}:{user_id}:{}:{}",
        local.format("%Y-%m-%d"),
        local.format("%H:%M"),
    )
}

fn matches_expr(expr: &str, value: u32, min: u32, max: u32) -> bool {
    if expr == "*" {
        return true;
    }

    expr.split(',').any(|token| {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        if let Some((start_raw, end_raw)) = token.split_once('-') {
            let (Ok(start), Ok(end)) = (start_raw.parse::<u32>(), end_raw.parse::<u32>()) else {
                return false;
            };
            if start < min || start > max || end < min || end > max {
                return false;
            }
            return value >= start && value <= end;
        }
        match token.parse::<u32>() {
            Ok(num) => num >= min && num <= max && num == value,
            Err(_) => false,
        }
    })
}

fn matches_dow(expr: &str, weekday: u32) -> bool {
    if expr == "*" {
        return true;
    }

    expr.split(',').any(|token| {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        let name = token.to_lowercase();
        let name = name.get(..3).unwrap_or("");
        if let Some(index) = DOW_NAMES.iter().position(|known| *known == name) {
            return index as u32 == weekday;
        }
        match token.parse::<i64>() {
            Ok(num) => ((num % 7 + 7) % 7) as u32 == weekday,
            Err(_) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(iso: &str) -> DateTime<Utc> {
        iso.parse::<DateTime<Utc>>().unwrap()
    }

    #[test]
    fn test_minute_hour_match() {
        let now = at("2026-02-08T07:00:00Z");
        assert!(should_run_cron_now("0 7 * * *", "UTC", now));
        assert!(!should_run_cron_now("1 7 * * *", "UTC", now));
        assert!(!should_run_cron_now("0 8 * * *", "UTC", now));
    }

    #[test]
    fn test_weekday_names_and_numbers() {
        // 2026-02-08 is a Sunday.
        let now = at("2026-02-08T18:00:00Z");
        assert!(should_run_cron_now("0 18 * * SUN", "UTC", now));
        assert!(should_run_cron_now("0 18 * * 0", "UTC", now));
        assert!(should_run_cron_now("0 18 * * 7", "UTC", now));
        assert!(!should_run_cron_now("0 18 * * MON", "UTC", now));
    }

    #[test]
    fn test_lists_and_ranges() {
        let now = at("2026-02-09T09:30:00Z");
        assert!(should_run_cron_now("15,30,45 9 * * *", "UTC", now));
        assert!(should_run_cron_now("0-40 8-10 * * mon", "UTC", now));
        assert!(!should_run_cron_now("31-40 9 * * *", "UTC", now));
    }

    #[test]
    fn test_timezone_shift() {
        // 07:00 in New York is 12:00 UTC on this winter date.
        let now = Utc.with_ymd_and_hms(2026, 2, 9, 12, 0, 0).unwrap();
        assert!(should_run_cron_now("0 7 * * *", "America/New_York", now));
        assert!(!should_run_cron_now("0 7 * * *", "UTC", now));
    }

    #[test]
    fn test_invalid_inputs() {
        let now = at("2026-02-08T07:00:00Z");
        assert!(!should_run_cron_now("0 7 * *", "UTC", now));
        assert!(!should_run_cron_now("0 7 * * *", "Not/AZone", now));
        assert!(!should_run_cron_now("x 7 * * *", "UTC", now));
    }

    #[test]
    fn test_slot_key_stable_within_minute() {
        let a = heartbeat_slot_key(
            "morning_briefing",
            "42",
            "UTC",
            at("2026-02-08T07:00:01Z"),
        );
        let b = heartbeat_slot_key(
            "morning_briefing",
            "42",
            "UTC",
            at("2026-02-08T07:00:59Z"),
        );
        let c = heartbeat_slot_key(
            "morning_briefing",
            "42",
            "UTC",
            at("2026-02-08T07:01:00Z"),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, "heartbeat:morning_briefing:42:2026-02-08:07:00");
    }

    #[test]
    fn test_slot_key_bad_timezone_falls_back_to_utc() {
        let key = heartbeat_slot_key("weekly_review", "7", "Bad/Zone", at("2026-02-08T18:05:00Z"));
        assert_eq!(key, "heartbeat:weekly_review:7:2026-02-08:18:05");
    }
}
