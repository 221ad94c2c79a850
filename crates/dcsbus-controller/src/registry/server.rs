use serde_json::Value;

/// Lifecycle status of a game-server node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Unregistered,
    Loading,
    Stopped,
    Running,
    Paused,
    Shutdown,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Unregistered => "Unregistered",
            ServerStatus::Loading => "Loading",
            ServerStatus::Stopped => "Stopped",
            ServerStatus::Running => "Running",
            ServerStatus::Paused => "Paused",
            ServerStatus::Shutdown => "Shutdown",
        }
    }

    /// Statuses in which only registration is accepted.
    pub fn rejects_commands(self) -> bool {
        matches!(self, ServerStatus::Unregistered | ServerStatus::Shutdown)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered (or known but not yet registered) game-server process.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub name: String,
    /// Local installation id.
    pub installation: String,
    /// Endpoint the controller sends requests to.
    pub host: String,
    pub port: u16,
    pub status: ServerStatus,
    pub process: Option<u32>,
    pub options: Value,
    pub settings: Value,
    pub dcs_version: Option<String>,
    /// Suppresses automated actions while set.
    pub maintenance: bool,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        installation: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            installation: installation.into(),
            host: host.into(),
            port,
            status: ServerStatus::Unregistered,
            process: None,
            options: Value::Null,
            settings: Value::Null,
            dcs_version: None,
            maintenance: false,
        }
    }
}
