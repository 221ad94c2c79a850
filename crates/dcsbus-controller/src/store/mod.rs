//! Backing store for persisted server identities.
//!
//! SQLite behind a small connection pool. Store calls are synchronous; the
//! registry runs them on tokio's blocking pool.

mod pool;
mod servers;

use std::path::PathBuf;

use thiserror::Error;

use dcsbus_core::DcsBusError;

pub use pool::{ConnectionPool, PooledConnection};
pub use servers::{EndpointIdentity, Reconciliation, ServerRecord, ServerStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for DcsBusError {
    fn from(e: StoreError) -> Self {
        DcsBusError::Store(e.to_string())
    }
}
