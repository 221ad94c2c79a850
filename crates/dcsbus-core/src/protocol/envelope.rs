//! Inbound envelope (one JSON object per datagram).
//!
//! Only the routing fields are typed; everything else stays in `fields` for
//! subscribers to interpret.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DcsBusError, Result};

use super::de;

/// Largest datagram the listener accepts (UDP max minus IPv6 jumbo headroom).
pub const MAX_DATAGRAM_BYTES: usize = 65504;

/// Decoded node message. Immutable once decoded; share it via `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating server (routing key).
    pub server_name: String,
    /// Operation name.
    pub command: String,
    /// Reply channel; `sync-` tokens correlate replies to pending calls.
    #[serde(
        default,
        deserialize_with = "de::opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel: Option<String>,
    /// Command-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope in code (tests, loopback messages).
    pub fn new(server_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            channel: None,
            fields: Map::new(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Command-specific field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sync-call token carried by this envelope, if any.
    pub fn sync_token(&self) -> Option<&str> {
        self.channel
            .as_deref()
            .filter(|c| super::request::is_sync_channel(c))
    }

    pub fn is_registration(&self) -> bool {
        self.command == super::REGISTER_COMMAND
    }
}

/// Decode one datagram into an envelope.
///
/// Rejects oversized payloads before touching the JSON parser. Surrounding
/// whitespace (nodes terminate with a newline) is ignored.
pub fn decode_datagram(buf: &[u8]) -> Result<Envelope> {
    if buf.len() > MAX_DATAGRAM_BYTES {
        return Err(DcsBusError::PayloadTooLarge(buf.len()));
    }
    let trimmed = trim_ascii(buf);
    if trimmed.is_empty() {
        return Err(DcsBusError::Decode("empty datagram".into()));
    }

    // Parse as a generic object first so a missing `server_name` gets its own message.
    let value: Value = serde_json::from_slice(trimmed)
        .map_err(|e| DcsBusError::Decode(format!("invalid json: {e}")))?;
    let Value::Object(obj) = value else {
        return Err(DcsBusError::Decode("datagram is not a json object".into()));
    };
    if !matches!(obj.get("server_name"), Some(Value::String(_))) {
        return Err(DcsBusError::Decode("missing server_name".into()));
    }

    serde_json::from_value(Value::Object(obj))
        .map_err(|e| DcsBusError::Decode(format!("invalid envelope: {e}")))
}

fn trim_ascii(mut buf: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = buf {
        if first.is_ascii_whitespace() {
            buf = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = buf {
        if last.is_ascii_whitespace() {
            buf = rest;
        } else {
            break;
        }
    }
    buf
}
