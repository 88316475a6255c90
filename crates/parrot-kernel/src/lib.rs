mod cooldown;
mod lookup;

pub use cooldown::{Claim, CooldownTracker};
pub use lookup::rank;

use chrono::{DateTime, Utc};
use parrot_contracts::{Settings, TriggerRecord};
use thiserror::Error;

pub const SETTING_ENABLED: &str = "enabled";
pub const SETTING_COOLDOWN: &str = "cooldown";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddRejection {
    #[error("trigger {0:?} is already in use")]
    Duplicate(String),
    #[error("space already holds the maximum of {0} triggers")]
    LimitReached(usize),
}

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

/// Triggers are stored lower-cased; matching relies on that.
pub fn normalize_trigger(raw: &str) -> String {
    raw.to_lowercase()
}

/// Checks a normalized trigger against the live records of a space.
/// The duplicate check runs before the limit check.
pub fn check_new_trigger(
    existing: &[TriggerRecord],
    normalized: &str,
    limit: usize,
) -> Result<(), AddRejection> {
    if existing.iter().any(|r| r.trigger == normalized) {
        return Err(AddRejection::Duplicate(normalized.to_string()));
    }
    if existing.len() >= limit {
        return Err(AddRejection::LimitReached(limit));
    }
    Ok(())
}

/// Lowest-id record whose trigger occurs in the raw message content.
///
/// Containment is case-sensitive against the raw content. Stored triggers
/// are lower-case, so "GM" in a message never matches the trigger "gm".
pub fn find_match<'a>(records: &'a [TriggerRecord], content: &str) -> Option<&'a TriggerRecord> {
    records
        .iter()
        .filter(|r| content.contains(r.trigger.as_str()))
        .min_by_key(|r| r.id)
}

pub fn encode_enabled(enabled: bool) -> String {
    let flag = if enabled { "1" } else { "0" };
    flag.to_string()
}

pub fn decode_enabled(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("1") | Some("true") => true,
        Some("0") | Some("false") => false,
        _ => default,
    }
}

pub fn encode_cooldown(seconds: u64) -> String {
    seconds.to_string()
}

pub fn decode_cooldown(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub fn decode_settings(
    enabled: Option<&str>,
    cooldown: Option<&str>,
    defaults: Settings,
) -> Settings {
    Settings {
        enabled: decode_enabled(enabled, defaults.enabled),
        cooldown_seconds: decode_cooldown(cooldown, defaults.cooldown_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, trigger: &str, response: &str) -> TriggerRecord {
        TriggerRecord {
            id,
            trigger: trigger.to_string(),
            response: response.to_string(),
            author_id: 1,
        }
    }

    #[test]
    fn normalize_lowercases_unicode() {
        assert_eq!(normalize_trigger("Hello ÉTÉ"), "hello été");
    }

    #[test]
    fn duplicate_is_reported_before_limit() {
        let existing: Vec<_> = (1..=20)
            .map(|i| record(i, &format!("t{i}"), "r"))
            .collect();
        assert_eq!(
            check_new_trigger(&existing, "t3", 20),
            Err(AddRejection::Duplicate("t3".to_string()))
        );
        assert_eq!(
            check_new_trigger(&existing, "fresh", 20),
            Err(AddRejection::LimitReached(20))
        );
        assert!(check_new_trigger(&existing[..19], "fresh", 20).is_ok());
    }

    #[test]
    fn first_match_is_lowest_id() {
        let records = vec![record(4, "morning", "b"), record(2, "gm", "a")];
        let hit = find_match(&records, "gm and good morning").unwrap();
        assert_eq!(hit.id, 2);
    }

    #[test]
    fn match_is_plain_containment() {
        let records = vec![record(1, "hello", "hi there")];
        assert!(find_match(&records, "well hello!").is_some());
        assert!(find_match(&records, "othello").is_some());
        assert!(find_match(&records, "HELLO").is_none());
        assert!(find_match(&records, "Hello").is_none());
        assert!(find_match(&records, "helo").is_none());
    }

    #[test]
    fn no_records_never_match() {
        assert!(find_match(&[], "anything").is_none());
    }

    #[test]
    fn settings_codec_falls_back_to_defaults() {
        assert!(decode_enabled(Some("1"), false));
        assert!(decode_enabled(Some("True"), false));
        assert!(!decode_enabled(Some("0"), true));
        assert!(decode_enabled(Some("garbage"), true));
        assert!(decode_enabled(None, true));
        assert_eq!(decode_cooldown(Some("12"), 5), 12);
        assert_eq!(decode_cooldown(Some("-3"), 5), 5);
        assert_eq!(decode_cooldown(None, 5), 5);
        assert!(!decode_enabled(Some(&encode_enabled(false)), true));
        assert_eq!(decode_cooldown(Some(&encode_cooldown(0)), 5), 0);
    }

    #[test]
    fn decode_settings_combines_both_fields() {
        let settings = decode_settings(Some("0"), Some("30"), Settings::default());
        assert_eq!(
            settings,
            Settings {
                enabled: false,
                cooldown_seconds: 30
            }
        );
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_rfc3339("2026-02-14T01:00:00+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-14T00:00:00+00:00");
        assert!(parse_rfc3339("yesterday").is_none());
    }
}
