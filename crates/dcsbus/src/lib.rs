//! Top-level facade crate for dcsbus.
//!
//! Re-exports the wire contracts and the controller runtime so users can depend on a single crate.

pub mod core {
    pub use dcsbus_core::*;
}

pub mod controller {
    pub use dcsbus_controller::*;
}
