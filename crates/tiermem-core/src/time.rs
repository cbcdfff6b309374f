//! Time Utilities
//!
//! Persisted timestamps are RFC 3339 UTC with microsecond precision and a
//! trailing `Z`. Reading also accepts naive ISO-8601 (treated as UTC).

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

/// Current UTC time, truncated to the precision that survives persistence.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse a persisted timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a timestamp for persistence.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serde adapter for `#[serde(with = "crate::time::iso8601")]`.
pub mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_format_has_trailing_z() {
        let dt = parse_timestamp("2025-07-30T12:00:00Z").unwrap();
        assert_eq!(format_timestamp(&dt), "2025-07-30T12:00:00.000000Z");
    }

    #[test]
    fn test_parse_format_roundtrip() {
        let now = now_utc();
        let parsed = parse_timestamp(&format_timestamp(&now)).unwrap();
        assert_eq!(now, parsed);
    }

    #[test]
    fn test_parse_naive_and_offset() {
        let naive = parse_timestamp("2025-07-30T08:15:30.250000").unwrap();
        assert_eq!(naive.hour(), 8);
        assert_eq!(naive.nanosecond(), 250_000_000);

        let offset = parse_timestamp("2025-07-30T10:00:00+02:00").unwrap();
        assert_eq!(offset.hour(), 8);
        assert_eq!(offset.day(), 30);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
