//! Timestamps for evidence entries.
//!
//! Timestamps are UTC with microsecond precision and render to a fixed-width
//! text form, so lexicographic order on the stored text equals chronological
//! order. Timestamps issued by [`Timestamp::now_monotonic`] strictly increase
//! within a process.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Text layout of a stored timestamp
const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Last microsecond value handed out in this process
static LAST_ISSUED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall clock timestamp, microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time, strictly greater than every timestamp previously
    /// returned by this function in the process.
    #[must_use]
    pub fn now_monotonic() -> Self {
        let now = Utc::now().timestamp_micros();
        let mut prev = LAST_ISSUED_MICROS.load(Ordering::Relaxed);
        loop {
            let next = if now > prev { now } else { prev + 1 };
            match LAST_ISSUED_MICROS.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self::from_micros(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Build from microseconds since the Unix epoch
    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        Self(
            DateTime::from_timestamp_micros(micros)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    /// Microseconds since the Unix epoch
    #[must_use]
    pub fn as_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// Wrap a chrono datetime, truncating to microseconds
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::from_micros(dt.timestamp_micros())
    }

    /// Underlying chrono datetime
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Fixed-width sortable text form
    #[must_use]
    pub fn to_canonical(&self) -> String {
        self.0.format(FORMAT).to_string()
    }

    /// Parse the canonical text form, or any RFC 3339 timestamp
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a recognised timestamp
    pub fn parse(text: &str) -> CoreResult<Self> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, FORMAT) {
            return Ok(Self(Utc.from_utc_datetime(&naive)));
        }
        DateTime::parse_from_rfc3339(text)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::InvalidTimestamp {
                reason: format!("{}: {}", text, e),
            })
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_canonical()
    }
}

impl TryFrom<String> for Timestamp {
    type Error = CoreError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl std::str::FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let mut last = Timestamp::now_monotonic();
        for _ in 0..1000 {
            let next = Timestamp::now_monotonic();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_canonical_is_fixed_width() {
        let a = Timestamp::from_micros(0);
        let b = Timestamp::from_micros(1_700_000_000_123_456);
        assert_eq!(a.to_canonical(), "1970-01-01T00:00:00.000000Z");
        assert_eq!(a.to_canonical().len(), b.to_canonical().len());
        assert_eq!(b.to_canonical(), "2023-11-14T22:13:20.123456Z");
    }

    #[test]
    fn test_text_order_matches_time_order() {
        let a = Timestamp::from_micros(1_000_000);
        let b = Timestamp::from_micros(1_000_001);
        assert!(a.to_canonical() < b.to_canonical());
    }

    #[test]
    fn test_parse_roundtrip_and_rfc3339() {
        let ts = Timestamp::from_micros(1_700_000_000_123_456);
        assert_eq!(Timestamp::parse(&ts.to_canonical()).unwrap(), ts);

        let parsed = Timestamp::parse("2023-11-14T23:13:20.123456+01:00").unwrap();
        assert_eq!(parsed, ts);

        assert!(Timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn test_serde_as_text() {
        let ts = Timestamp::from_micros(0);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:00.000000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
