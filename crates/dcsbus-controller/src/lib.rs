//! dcsbus controller library entry.
//!
//! Wires the UDP transport, per-server inboxes, dispatch router, correlation
//! table, and server registry into one controller. Consumed by the binary
//! (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod inbox;
pub mod obs;
pub mod registry;
pub mod store;
pub mod transport;

pub use controller::Controller;
