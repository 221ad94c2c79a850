//! Server registry: identity, lifecycle, and rename/conflict handling.
//!
//! The registry owns every `Server`. Lookups are lock-free (`DashMap`);
//! registration is serialized so rename detection never interleaves.

mod catalog;
mod lifecycle;
mod registry;
mod server;

pub use catalog::{ConfigCatalog, Installation, InstallationCatalog};
pub use lifecycle::{status_for_event, LIFECYCLE_COMMANDS};
pub use registry::ServerRegistry;
pub use server::{Server, ServerStatus};
