//! Lenient field decoders shared by the wire types.
//!
//! Node scripts are not consistent about quoting: channels and ports arrive
//! both as JSON strings and as JSON numbers.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

pub(crate) fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

pub(crate) fn opt_string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

pub(crate) fn port<'de, D>(d: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = string_or_number(d)?;
    raw.trim()
        .parse::<u16>()
        .map_err(|_| de::Error::custom(format!("invalid port: {raw}")))
}
