//! Turning raw broker payloads into records.
//!
//! Payloads are tried as JSON first. Anything that fails to parse is kept as
//! text under a `value` key, with invalid UTF-8 replaced by U+FFFD, so no
//! message is ever dropped for being malformed.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::debug;

use crate::types::Record;

/// Decodes a payload body into a JSON value.
///
/// Never fails: non-JSON bodies become `{"value": "<lossy text>"}`.
pub fn decode_payload(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "Payload is not JSON, keeping as text");
            wrap_raw(bytes)
        }
    }
}

/// Wraps an opaque payload as `{"value": "<lossy text>"}`.
pub fn wrap_raw(bytes: &[u8]) -> Value {
    json!({ "value": String::from_utf8_lossy(bytes) })
}

/// Builds a record for a message received on `topic`.
pub fn decode(topic: &str, bytes: &[u8], observed_at: Option<DateTime<Utc>>) -> Record {
    Record {
        topic: topic.to_string(),
        payload: decode_payload(bytes),
        observed_at,
    }
}
