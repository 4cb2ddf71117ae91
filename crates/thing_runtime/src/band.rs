//! State Bands
//!
//! A thing's state is partitioned into four bands. Input holds what the
//! device reports, output what has been requested but not yet acknowledged,
//! meta descriptive metadata and connection the reachability flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use thing_types::{Timestamp, Value, ValueMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    #[serde(rename = "istate")]
    Input,
    #[serde(rename = "ostate")]
    Output,
    Meta,
    Connection,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Input, Band::Output, Band::Meta, Band::Connection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Input => "istate",
            Band::Output => "ostate",
            Band::Meta => "meta",
            Band::Connection => "connection",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "istate" | "input" => Ok(Band::Input),
            "ostate" | "output" => Ok(Band::Output),
            "meta" => Ok(Band::Meta),
            "connection" => Ok(Band::Connection),
            other => Err(format!("unknown band: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Update Options
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how [`crate::Thing::update`] merges a partial map into a band
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    /// Reject the whole update when the incoming timestamp is older than the band's
    pub check_timestamp: bool,
    /// Stamp the band when anything changed
    pub set_timestamp: bool,
    /// Schedule change notifications
    pub notify: bool,
    /// Run values through the attribute schema
    pub validate: bool,
    /// Explicit incoming timestamp; otherwise `@timestamp` in the payload
    pub timestamp: Option<Timestamp>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            check_timestamp: false,
            set_timestamp: true,
            notify: true,
            validate: true,
            timestamp: None,
        }
    }
}

impl UpdateOptions {
    /// Every flag off; callers opt in to what they need
    pub fn none() -> Self {
        Self {
            check_timestamp: false,
            set_timestamp: false,
            notify: false,
            validate: false,
            timestamp: None,
        }
    }

    pub fn check_timestamp(mut self, check: bool) -> Self {
        self.check_timestamp = check;
        self
    }

    pub fn set_timestamp(mut self, set: bool) -> Self {
        self.set_timestamp = set;
        self
    }

    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Band State
// ─────────────────────────────────────────────────────────────────────────────

/// Values of one band plus the timestamp of its last accepted change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandState {
    pub values: ValueMap,
    pub timestamp: Option<Timestamp>,
}

impl BandState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Snapshot including the timestamp under `@timestamp`
    pub fn snapshot(&self) -> ValueMap {
        let mut values = self.values.clone();
        if let Some(ts) = &self.timestamp {
            values.insert("@timestamp".to_string(), Value::String(ts.to_string()));
        }
        values
    }
}

/// The output band with its in-flight push accounting
#[derive(Debug, Clone, Default)]
pub struct OutputState {
    pub band: BandState,
    /// Counted pushes dispatched (or queued for dispatch) and not yet completed
    pub pushes: usize,
    /// Codes waiting for a queued push that has not reached the bridge yet
    pub queued: Option<Vec<String>>,
    /// Whether the queued push was added to `pushes`
    pub queued_counted: bool,
}

/// The connection band
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub reachable: bool,
    pub timestamp: Option<Timestamp>,
}

impl ConnectionState {
    pub fn band(&self) -> BandState {
        let mut values = ValueMap::new();
        values.insert("iot:reachable".to_string(), Value::Bool(self.reachable));
        BandState {
            values,
            timestamp: self.timestamp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_names_round_trip() {
        for band in Band::ALL {
            assert_eq!(band.as_str().parse::<Band>(), Ok(band));
        }
        assert_eq!("output".parse::<Band>(), Ok(Band::Output));
        assert!("bogus".parse::<Band>().is_err());
    }

    #[test]
    fn test_snapshot_includes_timestamp() {
        let mut band = BandState::default();
        band.values.insert("on".into(), Value::Bool(true));
        assert!(!band.snapshot().contains_key("@timestamp"));

        band.timestamp = Timestamp::parse("2024-01-01T00:00:00Z");
        let snapshot = band.snapshot();
        assert_eq!(
            snapshot.get("@timestamp").and_then(Value::as_str),
            Some("2024-01-01T00:00:00.000Z")
        );
    }
}
