//! Canonical timestamps
//!
//! Every serialized time field uses `YYYY-MM-DD HH:MM:SS` in local time with
//! no fractional seconds and no offset suffix.

use chrono::{DateTime, Local, NaiveDateTime, Timelike};

/// `strftime` pattern of the canonical timestamp
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock time truncated to whole seconds
pub fn now() -> NaiveDateTime {
    truncate(Local::now())
}

/// Drop the offset and sub-second part of a local time
pub fn truncate(ts: DateTime<Local>) -> NaiveDateTime {
    let naive = ts.naive_local();
    naive.with_nanosecond(0).unwrap_or(naive)
}

/// Format a timestamp in the canonical form
pub fn canonical(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Parse a canonical timestamp
pub fn parse_canonical(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, CANONICAL_FORMAT)
}

/// Serde adapter: `#[serde(with = "crate::core::time::serde_canonical")]`
pub mod serde_canonical {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::canonical(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_canonical(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn is_canonical(s: &str) -> bool {
        let b = s.as_bytes();
        b.len() == 19
            && b.iter().enumerate().all(|(i, c)| match i {
                4 | 7 => *c == b'-',
                10 => *c == b' ',
                13 | 16 => *c == b':',
                _ => c.is_ascii_digit(),
            })
    }

    #[test]
    fn test_canonical_format() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_milli_opt(9, 3, 7, 999)
            .unwrap();
        assert_eq!(canonical(&ts), "2024-01-05 09:03:07");
    }

    #[test]
    fn test_now_has_no_subsecond_part() {
        let ts = now();
        assert_eq!(ts.nanosecond(), 0);
        assert!(is_canonical(&canonical(&ts)));
    }

    #[test]
    fn test_parse_roundtrip_and_reject_offset() {
        let ts = parse_canonical("2024-03-01 23:59:59").unwrap();
        assert_eq!(canonical(&ts), "2024-03-01 23:59:59");
        assert!(parse_canonical("2024-03-01T23:59:59+08:00").is_err());
        assert!(parse_canonical("2024-03-01 23:59:59.120").is_err());
    }
}
