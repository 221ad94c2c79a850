//! Typed view of a `registerDCSServer` envelope.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DcsBusError, Result};

use super::de;
use super::envelope::Envelope;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    /// Must equal the controller's protocol version.
    #[serde(deserialize_with = "de::string_or_number")]
    pub hook_version: String,
    /// Endpoint the node listens on for controller requests.
    pub host: String,
    #[serde(deserialize_with = "de::port")]
    pub port: u16,
    #[serde(default)]
    pub options: Value,
    #[serde(default, rename = "serverSettings")]
    pub server_settings: Value,
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub dcs_version: Option<String>,
    /// Present while a mission is loaded.
    #[serde(default)]
    pub current_mission: Option<Value>,
    #[serde(default)]
    pub pause: bool,
    /// Process id of the node, when the hook reports it.
    #[serde(default)]
    pub pid: Option<u32>,
}

impl Registration {
    pub fn from_envelope(env: &Envelope) -> Result<Self> {
        serde_json::from_value(Value::Object(env.fields.clone())).map_err(|e| {
            DcsBusError::Decode(format!(
                "invalid registration from {}: {e}",
                env.server_name
            ))
        })
    }

    /// Whether the node reported a loaded mission.
    pub fn has_mission(&self) -> bool {
        matches!(&self.current_mission, Some(v) if !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn string_port_and_numeric_version() {
        let env = Envelope::new("Alpha", "registerDCSServer")
            .with_field("hook_version", json!(1.1))
            .with_field("host", json!("127.0.0.1"))
            .with_field("port", json!("6666"));
        let reg = Registration::from_envelope(&env).unwrap();
        assert_eq!(reg.hook_version, "1.1");
        assert_eq!(reg.port, 6666);
        assert!(!reg.has_mission());
    }

    #[test]
    fn missing_endpoint_is_a_decode_error() {
        let env =
            Envelope::new("Alpha", "registerDCSServer").with_field("hook_version", json!("1.1"));
        assert!(Registration::from_envelope(&env).is_err());
    }
}
