//! Network transport: a single UDP socket shared by ingestion and outbound requests.

pub mod udp;

pub use udp::{resolve_target, send_datagram, UdpListener};
