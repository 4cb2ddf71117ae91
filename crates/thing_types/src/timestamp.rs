//! Band timestamps and the last-writer-wins merge rule
//!
//! Timestamps are ISO-8601 strings compared lexicographically. Everything
//! produced here is normalised to UTC with millisecond precision
//! (`2024-05-01T12:00:00.000Z`) so lexicographic and chronological order agree.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// An ISO-8601 timestamp attached to a band or an incoming update
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Current time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Normalised form of a UTC date-time
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Parse and normalise an ISO-8601 date-time; naive values are taken as UTC
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self::from_datetime(dt.with_timezone(&Utc)));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|naive| Self::from_datetime(naive.and_utc()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decide whether an incoming update wins against the stored band timestamp
///
/// | stored  | incoming | result                         |
/// |---------|----------|--------------------------------|
/// | absent  | absent   | apply                          |
/// | absent  | present  | apply                          |
/// | present | absent   | reject                         |
/// | present | present  | apply iff `incoming >= stored` |
///
/// Ties favour the incoming value.
pub fn should_apply(stored: Option<&Timestamp>, incoming: Option<&Timestamp>) -> bool {
    match (stored, incoming) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(stored), Some(incoming)) => incoming >= stored,
    }
}
