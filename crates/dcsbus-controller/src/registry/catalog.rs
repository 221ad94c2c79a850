use std::sync::RwLock;

use crate::config::InstallationConfig;

/// A local installation able to host a named server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub id: String,
    pub server_name: String,
    pub host: String,
    pub port: u16,
}

impl From<&InstallationConfig> for Installation {
    fn from(c: &InstallationConfig) -> Self {
        Self {
            id: c.id.clone(),
            server_name: c.server_name.clone(),
            host: c.dcs_host.clone(),
            port: c.dcs_port,
        }
    }
}

/// Discovery of local installations by server name.
pub trait InstallationCatalog: Send + Sync {
    fn find(&self, server_name: &str) -> Option<Installation>;
    fn all(&self) -> Vec<Installation>;

    /// Whether any installation claims `server_name`.
    fn claims(&self, server_name: &str) -> bool {
        self.find(server_name).is_some()
    }
}

/// Installations declared in the controller config; reloadable at runtime.
#[derive(Default)]
pub struct ConfigCatalog {
    installations: RwLock<Vec<Installation>>,
}

impl ConfigCatalog {
    pub fn new(installations: &[InstallationConfig]) -> Self {
        Self {
            installations: RwLock::new(installations.iter().map(Installation::from).collect()),
        }
    }

    /// Replace the known installations (e.g. after a node was renamed on disk).
    pub fn reload(&self, installations: &[InstallationConfig]) {
        let fresh: Vec<Installation> = installations.iter().map(Installation::from).collect();
        match self.installations.write() {
            Ok(mut g) => *g = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    fn snapshot(&self) -> Vec<Installation> {
        match self.installations.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl InstallationCatalog for ConfigCatalog {
    fn find(&self, server_name: &str) -> Option<Installation> {
        self.snapshot().into_iter().find(|i| i.server_name == server_name)
    }

    fn all(&self) -> Vec<Installation> {
        self.snapshot()
    }
}
