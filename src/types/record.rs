//! Records and the persisted state document.
//!
//! # File Format
//!
//! In append mode the state file holds a JSON array of records:
//!
//! ```text
//! [{"topic": "bike/lock", "payload": {"locked": true}}, ...]
//! ```
//!
//! In replace mode it holds the most recent record as a single object.
//! The `ts` field is only present when ingestion timestamps are enabled.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One decoded broker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The topic the message was published on.
    pub topic: String,

    /// The decoded body. Non-JSON bodies arrive here as `{"value": "..."}`.
    pub payload: Value,

    /// When the message was ingested, if timestamps are enabled.
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Record {
            topic: topic.into(),
            payload,
            observed_at: None,
        }
    }

    /// Attaches an ingestion timestamp.
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }
}

/// How a new record is folded into the persisted state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Keep every record, in arrival order.
    #[default]
    Append,

    /// Keep only the most recent record.
    Replace,
}

/// Error returned when parsing an unknown store mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid store mode {0:?}: expected \"append\" or \"replace\"")]
pub struct InvalidStoreMode(pub String);

impl FromStr for StoreMode {
    type Err = InvalidStoreMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(StoreMode::Append),
            "replace" => Ok(StoreMode::Replace),
            _ => Err(InvalidStoreMode(s.to_string())),
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Append => write!(f, "append"),
            StoreMode::Replace => write!(f, "replace"),
        }
    }
}

/// The complete persisted document.
///
/// Deserialization accepts either shape regardless of the configured mode,
/// so a file written under one mode can still be read after switching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreState {
    /// Append mode: every record in arrival order.
    History(Vec<Record>),

    /// Replace mode: the most recent record only.
    Latest(Record),
}

impl StoreState {
    /// Number of records held.
    pub fn len(&self) -> usize {
        match self {
            StoreState::History(records) => records.len(),
            StoreState::Latest(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens either shape into a list of records, oldest first.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            StoreState::History(records) => records,
            StoreState::Latest(record) => vec![record],
        }
    }

    /// Returns the most recently stored record, if any.
    pub fn latest(&self) -> Option<&Record> {
        match self {
            StoreState::History(records) => records.last(),
            StoreState::Latest(record) => Some(record),
        }
    }
}
