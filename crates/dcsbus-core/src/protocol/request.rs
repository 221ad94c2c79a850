//! Outbound requests (controller -> node).

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DcsBusError, Result};

use super::envelope::MAX_DATAGRAM_BYTES;

/// Channel prefix marking a correlated (synchronous) call.
pub const SYNC_PREFIX: &str = "sync-";

/// Channel used for fire-and-forget messages.
pub const NO_CHANNEL: &str = "-1";

/// Fresh correlation token: `sync-` plus a random v4 uuid.
pub fn new_sync_token() -> String {
    format!("{SYNC_PREFIX}{}", Uuid::new_v4().simple())
}

pub fn is_sync_channel(channel: &str) -> bool {
    channel.starts_with(SYNC_PREFIX)
}

/// JSON object sent to a node. Always carries a `command`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Request {
    fields: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("command".into(), Value::String(command.into()));
        Self { fields }
    }

    /// Wrap an arbitrary payload; it must be an object with a string `command`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(DcsBusError::Decode("request must be a json object".into()));
        };
        if !matches!(fields.get("command"), Some(Value::String(_))) {
            return Err(DcsBusError::Decode("request requires a string command".into()));
        }
        Ok(Self { fields })
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn command(&self) -> &str {
        self.fields
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn channel(&self) -> Option<&str> {
        self.fields.get("channel").and_then(Value::as_str)
    }

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        self.fields.insert("channel".into(), Value::String(channel.into()));
    }

    /// Serialize for the wire, enforcing the datagram limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(&self.fields)
            .map_err(|e| DcsBusError::Decode(format!("request encode failed: {e}")))?;
        if bytes.len() > MAX_DATAGRAM_BYTES {
            return Err(DcsBusError::PayloadTooLarge(bytes.len()));
        }
        Ok(bytes)
    }
}
