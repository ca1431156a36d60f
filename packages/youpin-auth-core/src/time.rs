//! Time utilities.
//!
//! The gateway validates request freshness against China Standard Time, so
//! the timestamp inside every signed envelope is rendered in a fixed UTC+08:00
//! offset regardless of the host's local zone.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Textual layout the gateway expects (`YYYY-MM-DD HH:mm:ss`)
pub const GATEWAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset of the gateway's civil time zone (Asia/Shanghai, no DST)
pub const GATEWAY_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

fn gateway_offset() -> FixedOffset {
    // 8h is always within the range FixedOffset accepts
    FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS).unwrap_or(Utc.fix())
}

/// A timestamp already rendered in the gateway's zone and format.
///
/// Only constructible through [`GatewayTimestamp::now`],
/// [`GatewayTimestamp::at`] or a validating [`GatewayTimestamp::parse`], so a
/// malformed timestamp never reaches the signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayTimestamp(String);

impl GatewayTimestamp {
    /// Current instant in UTC+08:00
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Render an arbitrary instant in UTC+08:00
    pub fn at(instant: DateTime<Utc>) -> Self {
        let local = instant.with_timezone(&gateway_offset());
        Self(local.format(GATEWAY_TIME_FORMAT).to_string())
    }

    /// Validate a caller-supplied timestamp string
    ///
    /// ## Errors
    ///
    /// `Error::InvalidTimestamp` unless the input is exactly
    /// `YYYY-MM-DD HH:mm:ss` (zero-padded, 19 characters).
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 19 {
            return Err(Error::InvalidTimestamp(s.to_string()));
        }
        let parsed = NaiveDateTime::parse_from_str(s, GATEWAY_TIME_FORMAT)
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))?;
        // Reject non-padded forms chrono tolerates, e.g. "2023-1-05 ..."
        if parsed.format(GATEWAY_TIME_FORMAT).to_string() != s {
            return Err(Error::InvalidTimestamp(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The rendered timestamp
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GatewayTimestamp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<GatewayTimestamp> for String {
    fn from(ts: GatewayTimestamp) -> Self {
        ts.0
    }
}

/// Browser-style `Date.toString()` rendering used inside device fingerprints,
/// e.g. `Tue Dec 05 2023 16:15:00 GMT+0800`.
pub fn browser_date_string(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&gateway_offset())
        .format("%a %b %d %Y %H:%M:%S GMT%z")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_timestamp_is_reasonable() {
        let ts = now_timestamp();
        // Should be after 2024-01-01 (1704067200)
        assert!(ts > 1704067200, "Timestamp {} is too old", ts);
        assert!(ts < 4102444800, "Timestamp {} is too far in future", ts);
    }

    #[test]
    fn test_gateway_timestamp_uses_utc_plus_eight() {
        let instant = Utc.with_ymd_and_hms(2023, 12, 5, 8, 15, 0).single().unwrap();
        assert_eq!(GatewayTimestamp::at(instant).as_str(), "2023-12-05 16:15:00");
    }

    #[test]
    fn test_gateway_timestamp_crosses_midnight() {
        let instant = Utc.with_ymd_and_hms(2023, 12, 31, 20, 0, 1).single().unwrap();
        assert_eq!(GatewayTimestamp::at(instant).as_str(), "2024-01-01 04:00:01");
    }

    #[test]
    fn test_now_round_trips_through_parse() {
        let ts = GatewayTimestamp::now();
        assert_eq!(GatewayTimestamp::parse(ts.as_str()).unwrap(), ts);
    }

    #[test]
    fn test_parse_rejects_drifted_formats() {
        for bad in [
            "2023-12-05T16:15:00",
            "2023-12-05 16:15",
            "2023-1-05 16:15:00",
            "2023/12/05 16:15:00",
            "2023-12-05 16:15:00Z",
            "2023-12-05  6:15:00",
            "",
        ] {
            assert!(
                matches!(GatewayTimestamp::parse(bad), Err(Error::InvalidTimestamp(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_serde_validates() {
        let ok: GatewayTimestamp = serde_json::from_str("\"2023-12-05 16:15:00\"").unwrap();
        assert_eq!(ok.to_string(), "2023-12-05 16:15:00");
        assert!(serde_json::from_str::<GatewayTimestamp>("\"yesterday\"").is_err());
    }

    #[test]
    fn test_browser_date_string() {
        let instant = Utc.with_ymd_and_hms(2023, 12, 5, 8, 15, 0).single().unwrap();
        assert_eq!(browser_date_string(instant), "Tue Dec 05 2023 16:15:00 GMT+0800");
    }
}
