//! Protocol modules (node <-> controller wire contracts).
//!
//! Every datagram carries exactly one JSON object:
//! - `envelope`: inbound messages, routed by `server_name`.
//! - `registration`: typed view of a `registerDCSServer` envelope.
//! - `request`: outbound messages plus the sync-call channel tokens.
//!
//! All parsers are panic-free: malformed input is reported as `DcsBusError`
//! so a hostile or buggy node can never take the listener down.

pub mod envelope;
pub mod registration;
pub mod request;

mod de;

pub use envelope::{decode_datagram, Envelope, MAX_DATAGRAM_BYTES};
pub use registration::Registration;
pub use request::{is_sync_channel, new_sync_token, Request, NO_CHANNEL, SYNC_PREFIX};

/// Command a node sends to announce itself.
pub const REGISTER_COMMAND: &str = "registerDCSServer";
