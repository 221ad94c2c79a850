//! Routing of decoded envelopes.
//!
//! - `correlation`: pending synchronous calls keyed by channel token.
//! - `dispatcher`: correlate-then-fan-out router and the subscriber trait.
//! - `pipeline`: what an inbox worker does with each envelope.

pub mod correlation;
pub mod dispatcher;
pub mod pipeline;

pub use correlation::{CorrelationTable, PendingReply};
pub use dispatcher::{DispatchOutcome, Dispatcher, EventListener};
pub use pipeline::Pipeline;
