//! Shared error type across dcsbus crates.

use thiserror::Error;

/// Stable error codes (used in logs, metrics labels, and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed datagram.
    Decode,
    /// Datagram exceeds the supported payload size.
    PayloadTooLarge,
    /// Command for a server that is not registered.
    UnregisteredServer,
    /// No local installation claims the server name.
    NotFound,
    /// Node runs a different protocol version.
    VersionMismatch,
    /// Endpoint already belongs to another installation.
    PortConflict,
    /// Synchronous call exceeded its deadline.
    Timeout,
    /// Event subscriber failed.
    Subscriber,
    /// Backing store failure.
    Store,
    /// Invalid configuration.
    Config,
    /// Socket or filesystem failure.
    Io,
    /// Listener is not running.
    NotRunning,
    /// Listener shut down while the call was pending.
    Shutdown,
}

impl ErrorCode {
    /// String representation used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Decode => "DECODE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::UnregisteredServer => "UNREGISTERED_SERVER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::VersionMismatch => "VERSION_MISMATCH",
            ErrorCode::PortConflict => "PORT_CONFLICT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Subscriber => "SUBSCRIBER",
            ErrorCode::Store => "STORE",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Io => "IO",
            ErrorCode::NotRunning => "NOT_RUNNING",
            ErrorCode::Shutdown => "SHUTDOWN",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, DcsBusError>;

/// Unified error type used by core and controller.
#[derive(Debug, Clone, Error)]
pub enum DcsBusError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("server {0} is not registered")]
    UnregisteredServer(String),
    #[error("no installation found for server {0}")]
    NotFound(String),
    #[error("server {server} runs hook version {got}, expected {expected}")]
    VersionMismatch {
        server: String,
        expected: String,
        got: String,
    },
    #[error("server {server} conflicts with {holder} on the same endpoint")]
    PortConflict { server: String, holder: String },
    #[error("timeout waiting for {server} to answer {command}")]
    Timeout { server: String, command: String },
    #[error("listener {listener} failed: {msg}")]
    Subscriber { listener: String, msg: String },
    #[error("store: {0}")]
    Store(String),
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(String),
    #[error("listener not running")]
    NotRunning,
    #[error("listener shut down")]
    Shutdown,
}

impl DcsBusError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DcsBusError::Decode(_) => ErrorCode::Decode,
            DcsBusError::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            DcsBusError::UnregisteredServer(_) => ErrorCode::UnregisteredServer,
            DcsBusError::NotFound(_) => ErrorCode::NotFound,
            DcsBusError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            DcsBusError::PortConflict { .. } => ErrorCode::PortConflict,
            DcsBusError::Timeout { .. } => ErrorCode::Timeout,
            DcsBusError::Subscriber { .. } => ErrorCode::Subscriber,
            DcsBusError::Store(_) => ErrorCode::Store,
            DcsBusError::Config(_) => ErrorCode::Config,
            DcsBusError::Io(_) => ErrorCode::Io,
            DcsBusError::NotRunning => ErrorCode::NotRunning,
            DcsBusError::Shutdown => ErrorCode::Shutdown,
        }
    }

    /// True for the only error callers of synchronous requests are expected to handle.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DcsBusError::Timeout { .. })
    }
}

impl From<std::io::Error> for DcsBusError {
    fn from(e: std::io::Error) -> Self {
        DcsBusError::Io(e.to_string())
    }
}
