//! dcsbus core: transport-agnostic wire contracts and error types.
//!
//! This crate defines the envelope, registration, and request formats
//! exchanged between game-server nodes and the controller, plus the error
//! surface shared by every crate. It carries no socket or runtime
//! dependencies so node simulators and tools can reuse it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible
//! paths surface as `DcsBusError`/`Result` so malformed traffic can never
//! crash the controller.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{DcsBusError, ErrorCode, Result};
