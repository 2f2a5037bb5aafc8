// src/services/transform.rs

//! Raw roster entry to [`PlayerRecord`] conversion.
//!
//! Every entry is handled independently. An entry that cannot be converted
//! becomes a [`RejectEntry`] and never aborts the rest of the batch.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::models::{PlayerRecord, RejectEntry, RejectReason, TaggedEntry};

/// Label used in reject logs when an entry has no readable name.
const UNKNOWN_LABEL: &str = "Unknown";

/// Longest crew tag accepted from a separator form.
const MAX_TAG_LEN: usize = 8;

static BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*([^\]\[]+?)\s*\]").expect("valid bracket pattern"));
static PIPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^|\[\]\s]+)\s*\|\s*([^|\[\]\s]+)").expect("valid pipe pattern")
});
static TIMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^|\[\]\s]+)\s+[xX]\s+([^|\[\]\s]+)").expect("valid times pattern")
});

/// Display-name conventions that carry a crew tag, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrewPattern {
    /// `[TAG] Name`
    Bracket,
    /// `Name | TAG` or `TAG | Name`
    Pipe,
    /// `Name x TAG` or `TAG x Name`
    Times,
}

impl CrewPattern {
    pub const PRIORITY: [CrewPattern; 3] = [Self::Bracket, Self::Pipe, Self::Times];

    fn extract(self, name: &str) -> Option<String> {
        match self {
            Self::Bracket => BRACKET
                .captures_iter(name)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .find(|tag| !tag.is_empty())
                .map(str::to_uppercase),
            Self::Pipe => separated(&PIPE, name),
            Self::Times => separated(&TIMES, name),
        }
    }
}

fn separated(pattern: &Regex, name: &str) -> Option<String> {
    let captures = pattern.captures(name)?;
    let left = captures.get(1)?.as_str();
    let right = captures.get(2)?.as_str();
    let tag = if looks_like_tag(right) && !looks_like_tag(left) {
        right
    } else {
        left
    };
    Some(tag.to_uppercase())
}

/// Short, no lower-case letters, only alphanumerics, `_` or `-`.
fn looks_like_tag(s: &str) -> bool {
    let len = s.chars().count();
    (1..=MAX_TAG_LEN).contains(&len)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        && !s.chars().any(char::is_lowercase)
}

/// Crew tag and the convention it was found with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrewMatch {
    pub tag: String,
    pub pattern: CrewPattern,
}

/// Extract a crew tag from a display name.
///
/// The first matching pattern in [`CrewPattern::PRIORITY`] wins.
pub fn extract_crew(name: &str) -> Option<CrewMatch> {
    CrewPattern::PRIORITY.iter().find_map(|&pattern| {
        pattern
            .extract(name)
            .map(|tag| CrewMatch { tag, pattern })
    })
}

/// Upper-cased crew tag for a display name, if any.
pub fn extract_crew_tag(name: &str) -> Option<String> {
    extract_crew(name).map(|m| m.tag)
}

/// Transform one raw entry, stamping missing timestamps with the wall clock.
pub fn transform(raw: &Value, source_tag: &str, index: usize) -> Result<PlayerRecord, RejectEntry> {
    transform_at(raw, source_tag, index, Utc::now())
}

/// Transform one raw entry, stamping missing timestamps with `now`.
pub fn transform_at(
    raw: &Value,
    source_tag: &str,
    index: usize,
    now: DateTime<Utc>,
) -> Result<PlayerRecord, RejectEntry> {
    let label = raw_label(raw);
    let reject = |reason: RejectReason, detail: Option<String>| RejectEntry {
        index,
        reason,
        detail,
        source_tag: source_tag.to_string(),
        raw_label: label.clone(),
    };

    if raw.is_null() {
        return Err(reject(RejectReason::NullRecord, None));
    }

    let external_id = match raw.get("Uid") {
        None | Some(Value::Null) => return Err(reject(RejectReason::MissingId, None)),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(reject(RejectReason::MissingId, None));
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(reject(
                RejectReason::TransformError,
                Some(format!("Uid has unsupported type: {}", type_name(other))),
            ));
        }
    };

    let (display_name, timestamp) = match raw.get("Username") {
        None | Some(Value::Null) => (String::new(), None),
        Some(Value::String(s)) => (s.trim().to_string(), None),
        Some(Value::Object(fields)) => {
            let name = match fields.get("Username") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.trim().to_string(),
                Some(other) => {
                    return Err(reject(
                        RejectReason::TransformError,
                        Some(format!(
                            "Username.Username has unsupported type: {}",
                            type_name(other)
                        )),
                    ));
                }
            };
            (name, fields.get("Timestamp"))
        }
        Some(other) => {
            return Err(reject(
                RejectReason::TransformError,
                Some(format!("Username has unsupported type: {}", type_name(other))),
            ));
        }
    };

    let last_seen_at = match timestamp {
        None | Some(Value::Null) => now,
        Some(value) => parse_timestamp(value).ok_or_else(|| {
            reject(
                RejectReason::TransformError,
                Some(format!("unparseable timestamp: {value}")),
            )
        })?,
    };

    Ok(PlayerRecord {
        crew_tag: extract_crew_tag(&display_name),
        external_id,
        display_name,
        source_tag: source_tag.to_string(),
        last_seen_at: Some(last_seen_at),
    })
}

/// Accepts RFC 3339 strings and epoch milliseconds (number or numeric string).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis))
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn raw_label(raw: &Value) -> String {
    let name = match raw.get("Username") {
        Some(Value::Object(fields)) => fields.get("Username").and_then(Value::as_str),
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    };
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_LABEL)
        .to_string()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Records and rejects from one transform pass, in entry order.
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    pub records: Vec<PlayerRecord>,
    pub rejects: Vec<RejectEntry>,
}

/// Transform a whole cycle's entries. Entry indices are positions in `entries`.
pub fn transform_batch(entries: &[TaggedEntry], now: DateTime<Utc>) -> TransformOutcome {
    let mut outcome = TransformOutcome::default();
    for (index, entry) in entries.iter().enumerate() {
        match transform_at(&entry.raw, &entry.source_tag, index, now) {
            Ok(record) => outcome.records.push(record),
            Err(reject) => outcome.rejects.push(reject),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn crew_tag_bracket() {
        assert_eq!(extract_crew_tag("[ABC] PlayerOne").as_deref(), Some("ABC"));
        assert_eq!(extract_crew_tag("[ lspd ] Officer").as_deref(), Some("LSPD"));
        assert_eq!(
            extract_crew("[abc]x").map(|m| m.pattern),
            Some(CrewPattern::Bracket)
        );
    }

    #[test]
    fn crew_tag_separators() {
        assert_eq!(extract_crew_tag("PlayerTwo | ABC").as_deref(), Some("ABC"));
        assert_eq!(extract_crew_tag("ABC | PlayerTwo").as_deref(), Some("ABC"));
        assert_eq!(extract_crew_tag("PlayerThree x ABC").as_deref(), Some("ABC"));
        assert_eq!(
            extract_crew("PlayerThree x ABC").map(|m| m.pattern),
            Some(CrewPattern::Times)
        );
    }

    #[test]
    fn crew_tag_ambiguous_sides_take_left() {
        assert_eq!(extract_crew_tag("abc | xyz").as_deref(), Some("ABC"));
        assert_eq!(extract_crew_tag("ABC | XYZ").as_deref(), Some("ABC"));
    }

    #[test]
    fn crew_tag_absent() {
        assert_eq!(extract_crew_tag("PlayerFour"), None);
        assert_eq!(extract_crew_tag(""), None);
        assert_eq!(extract_crew_tag("[ ] Player"), None);
        assert_eq!(extract_crew_tag("Max Power"), None);
    }

    #[test]
    fn bracket_wins_over_pipe() {
        assert_eq!(extract_crew_tag("[ONE] Name | TWO").as_deref(), Some("ONE"));
    }

    #[test]
    fn transforms_full_entry() {
        let raw = json!({
            "Uid": "u-1",
            "Username": { "Username": "  [abc] PlayerOne ", "Timestamp": "2026-01-01T10:00:00Z" }
        });
        let record = transform_at(&raw, "EU1", 0, now()).unwrap();
        assert_eq!(record.external_id, "u-1");
        assert_eq!(record.display_name, "[abc] PlayerOne");
        assert_eq!(record.crew_tag.as_deref(), Some("ABC"));
        assert_eq!(record.source_tag, "EU1");
        assert_eq!(
            record.last_seen_at,
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn numeric_uid_and_epoch_timestamp() {
        let raw = json!({ "Uid": 42, "Username": { "Username": "P", "Timestamp": 1_700_000_000_000i64 } });
        let record = transform_at(&raw, "US1", 0, now()).unwrap();
        assert_eq!(record.external_id, "42");
        assert_eq!(record.last_seen_at, DateTime::from_timestamp_millis(1_700_000_000_000));
    }

    #[test]
    fn missing_timestamp_uses_now() {
        let raw = json!({ "Uid": "u-2", "Username": { "Username": "PlayerFour" } });
        let record = transform_at(&raw, "US1", 3, now()).unwrap();
        assert_eq!(record.last_seen_at, Some(now()));
        assert_eq!(record.crew_tag, None);
    }

    #[test]
    fn rejects_carry_reason_and_label() {
        let null = transform_at(&Value::Null, "US1", 0, now()).unwrap_err();
        assert_eq!(null.reason, RejectReason::NullRecord);
        assert_eq!(null.raw_label, "Unknown");

        let missing = transform_at(&json!({ "Username": { "Username": "Ghost" } }), "US2", 5, now())
            .unwrap_err();
        assert_eq!(missing.reason, RejectReason::MissingId);
        assert_eq!(missing.index, 5);
        assert_eq!(missing.raw_label, "Ghost");
        assert_eq!(missing.source_tag, "US2");

        let empty = transform_at(&json!({ "Uid": "  " }), "US1", 0, now()).unwrap_err();
        assert_eq!(empty.reason, RejectReason::MissingId);

        let bad_time = transform_at(
            &json!({ "Uid": "u", "Username": { "Username": "P", "Timestamp": "yesterday" } }),
            "US1",
            0,
            now(),
        )
        .unwrap_err();
        assert_eq!(bad_time.reason, RejectReason::TransformError);
        assert!(bad_time.detail.is_some());
    }

    #[test]
    fn batch_isolates_bad_entries() {
        let entries = vec![
            TaggedEntry { source_tag: "A".into(), raw: json!({ "Uid": "1" }) },
            TaggedEntry { source_tag: "A".into(), raw: Value::Null },
            TaggedEntry { source_tag: "B".into(), raw: json!({ "Uid": true }) },
            TaggedEntry { source_tag: "B".into(), raw: json!({ "Uid": "2" }) },
        ];
        let outcome = transform_batch(&entries, now());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.rejects.len(), 2);
        assert_eq!(outcome.rejects[0].index, 1);
        assert_eq!(outcome.rejects[1].reason, RejectReason::TransformError);
    }
}
