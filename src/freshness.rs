//! Timestamp freshness filter for inbound commands.
//!
//! The bus may hand us retained, duplicated or late messages. A command is
//! acted on only when `now - ts - skew < max_age`.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::DecodeError;

/// Default maximum command age in seconds.
pub const DEFAULT_MAX_AGE_S: f64 = 10.0;
/// Default correction between the peers' clocks and ours, in seconds.
pub const DEFAULT_CLOCK_SKEW_S: f64 = 0.0;

const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a wire timestamp. Offsets are honored; naive forms are read as UTC.
pub fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, DecodeError> {
    let trimmed = ts.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|parsed| parsed.and_utc())
        .ok_or_else(|| DecodeError::Timestamp { ts: ts.to_string() })
}

/// Format an instant the way this process stamps outbound messages.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(WIRE_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Freshness {
    pub max_age_s: f64,
    pub skew_s: f64,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            max_age_s: DEFAULT_MAX_AGE_S,
            skew_s: DEFAULT_CLOCK_SKEW_S,
        }
    }
}

impl Freshness {
    pub fn new(max_age_s: f64, skew_s: f64) -> Self {
        Self { max_age_s, skew_s }
    }

    /// Check a wire timestamp against the local clock.
    pub fn check(&self, ts: &str) -> Result<bool, DecodeError> {
        self.check_at(ts, Utc::now())
    }

    pub fn check_at(&self, ts: &str, now: DateTime<Utc>) -> Result<bool, DecodeError> {
        let issued = parse_timestamp(ts)?;
        Ok(self.is_fresh(issued, now))
    }

    /// Timestamps from the future count as fresh.
    pub fn is_fresh(&self, issued: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed_s = (now - issued).num_milliseconds() as f64 / 1000.0 - self.skew_s;
        elapsed_s < self.max_age_s
    }
}

/// Freshness check with the default clock skew.
#[allow(dead_code)]
pub fn check_timestamp_ttl(ts: &str, max_age_s: f64) -> Result<bool, DecodeError> {
    Freshness::new(max_age_s, DEFAULT_CLOCK_SKEW_S).check(ts)
}
