/*++

Licensed under the Apache-2.0 license.

File Name:

   timestamp.rs

Abstract:

    File contains the container timestamp helpers. Timestamps count from 2000-01-01 UTC.

--*/

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::parse::parse_int;

/// Unix time of 2000-01-01T00:00:00Z
const EPOCH_2000_UNIX_SECS: i64 = 946_684_800;

/// Timestamp as written in a configuration file
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Number(u64),
    Text(String),
}

impl TimestampValue {
    /// Seconds since 2000-01-01, parsing text with base prefixes
    pub fn resolve(&self) -> anyhow::Result<u64> {
        match self {
            TimestampValue::Number(secs) => Ok(*secs),
            TimestampValue::Text(text) => parse_int(text),
        }
    }
}

/// Whole seconds between 2000-01-01 and `now`
pub fn seconds_since_2000(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp() - EPOCH_2000_UNIX_SECS).unwrap_or(0)
}

/// Whole seconds between 2000-01-01 and the current time
pub fn current_timestamp() -> u64 {
    seconds_since_2000(Utc::now())
}

/// Resolve an optional configured timestamp, defaulting to the current time
pub fn resolve_timestamp(value: Option<&TimestampValue>) -> anyhow::Result<u64> {
    match value {
        Some(value) => value.resolve(),
        None => {
            let now = current_timestamp();
            log::debug!("No timestamp configured, using {now}");
            Ok(now)
        }
    }
}

/// Convert seconds to the microsecond resolution used by SB2.1
pub fn to_micros(secs: u64) -> u64 {
    secs.saturating_mul(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_is_zero() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(seconds_since_2000(epoch), 0);
        let later = Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 1).unwrap();
        assert_eq!(seconds_since_2000(later), 86_401);
    }

    #[test]
    fn test_before_epoch_saturates() {
        let early = Utc.with_ymd_and_hms(1999, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(seconds_since_2000(early), 0);
    }

    #[test]
    fn test_text_timestamp_uses_base_prefix() {
        let value = TimestampValue::Text("0x10".into());
        assert_eq!(resolve_timestamp(Some(&value)).unwrap(), 16);
        let value = TimestampValue::Number(1234);
        assert_eq!(resolve_timestamp(Some(&value)).unwrap(), 1234);
        assert!(TimestampValue::Text("2021-01-01".into()).resolve().is_err());
    }

    #[test]
    fn test_micros() {
        assert_eq!(to_micros(3), 3_000_000);
    }
}
