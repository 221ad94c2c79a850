use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use dcsbus_core::error::{DcsBusError, Result};
use dcsbus_core::protocol::{Envelope, Registration};

use crate::store::{EndpointIdentity, Reconciliation, ServerStore};

use super::catalog::InstallationCatalog;
use super::lifecycle::status_for_event;
use super::server::{Server, ServerStatus};

/// Authoritative map `server_name -> Server`.
pub struct ServerRegistry {
    servers: DashMap<String, Server>,
    catalog: Arc<dyn InstallationCatalog>,
    store: Arc<ServerStore>,
    agent: String,
    version: String,
    // Serializes registrations: the rename check reads and writes the store.
    register_lock: Mutex<()>,
}

impl ServerRegistry {
    pub fn new(
        catalog: Arc<dyn InstallationCatalog>,
        store: Arc<ServerStore>,
        agent: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            servers: DashMap::new(),
            catalog,
            store,
            agent: agent.into(),
            version: version.into(),
            register_lock: Mutex::new(()),
        }
    }

    /// Create an UNREGISTERED entry for every installation not yet known.
    pub fn init_from_catalog(&self) -> usize {
        let mut added = 0;
        for inst in self.catalog.all() {
            self.servers.entry(inst.server_name.clone()).or_insert_with(|| {
                added += 1;
                Server::new(inst.server_name.clone(), inst.id.clone(), inst.host.clone(), inst.port)
            });
        }
        added
    }

    /// Register a node from its `registerDCSServer` envelope.
    ///
    /// Validation failures (unknown installation, version mismatch, port
    /// conflict, store failure) leave the registry as it was, except that a
    /// port conflict also drops any entry held under the new name.
    pub async fn register(&self, env: &Envelope) -> Result<ServerStatus> {
        let name = env.server_name.as_str();
        let _serial = self.register_lock.lock().await;

        let installation = self
            .catalog
            .find(name)
            .ok_or_else(|| DcsBusError::NotFound(name.to_string()))?;
        // Version first: an outdated hook may not send the fields parsed below.
        let got = match env.get("hook_version") {
            Some(Value::String(v)) => v.clone(),
            Some(Value::Number(v)) => v.to_string(),
            _ => String::new(),
        };
        if got != self.version {
            return Err(DcsBusError::VersionMismatch {
                server: name.to_string(),
                expected: self.version.clone(),
                got,
            });
        }
        let reg = Registration::from_envelope(env)?;
        tracing::debug!(server = %name, installation = %installation.id, "registering server");

        let identity = EndpointIdentity {
            agent: self.agent.clone(),
            host: reg.host.clone(),
            port: reg.port,
        };
        let store = Arc::clone(&self.store);
        let catalog = Arc::clone(&self.catalog);
        let new_name = name.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            store.record_registration(&identity, &new_name, |old| catalog.claims(old))
        })
        .await
        .map_err(|e| DcsBusError::Store(format!("store task failed: {e}")))??;

        let mut carried = None;
        match outcome {
            Reconciliation::PortConflict { holder } => {
                self.servers.remove(name);
                tracing::warn!(
                    server = %name,
                    holder = %holder,
                    "registration aborted due to port conflict"
                );
                return Err(DcsBusError::PortConflict {
                    server: name.to_string(),
                    holder,
                });
            }
            Reconciliation::Renamed { from } => {
                tracing::info!(from = %from, to = %name, "auto-renaming server");
                carried = self.servers.remove(&from).map(|(_, mut s)| {
                    s.name = name.to_string();
                    s
                });
            }
            Reconciliation::Unchanged => {}
        }

        let status = if reg.has_mission() {
            if reg.pause {
                ServerStatus::Paused
            } else {
                ServerStatus::Running
            }
        } else {
            ServerStatus::Stopped
        };

        let mut server = self.servers.entry(name.to_string()).or_insert_with(|| {
            carried.unwrap_or_else(|| {
                Server::new(
                    name,
                    installation.id.clone(),
                    installation.host.clone(),
                    installation.port,
                )
            })
        });
        server.installation = installation.id;
        server.host = installation.host;
        server.port = installation.port;
        server.process = reg.pid;
        server.options = reg.options;
        server.settings = reg.server_settings;
        server.dcs_version = reg.dcs_version;
        server.status = status;
        drop(server);

        tracing::debug!(server = %name, status = %status, "server initialized");
        Ok(status)
    }

    pub fn get(&self, name: &str) -> Option<Server> {
        self.servers.get(name).map(|s| s.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Sorted server names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn servers(&self) -> Vec<Server> {
        let mut all: Vec<Server> = self.servers.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.servers.get(name).map(|s| s.status)
    }

    /// Present and in a status that accepts commands.
    pub fn is_registered(&self, name: &str) -> bool {
        self.ensure_registered(name).is_ok()
    }

    /// `UnregisteredServer` unless `name` may receive non-registration commands.
    pub fn ensure_registered(&self, name: &str) -> Result<()> {
        match self.status(name) {
            Some(s) if !s.rejects_commands() => Ok(()),
            _ => Err(DcsBusError::UnregisteredServer(name.to_string())),
        }
    }

    pub fn set_status(&self, name: &str, status: ServerStatus) -> bool {
        match self.servers.get_mut(name) {
            Some(mut s) => {
                if s.status != status {
                    tracing::debug!(
                        server = %name,
                        from = %s.status,
                        to = %status,
                        "status change"
                    );
                }
                s.status = status;
                true
            }
            None => false,
        }
    }

    /// Apply a lifecycle event to its server. Returns the new status if the
    /// event carried one and the server is known.
    pub fn apply_event(&self, env: &Envelope) -> Option<ServerStatus> {
        let status = status_for_event(env)?;
        self.set_status(&env.server_name, status).then_some(status)
    }

    pub fn set_maintenance(&self, name: &str, on: bool) -> bool {
        match self.servers.get_mut(name) {
            Some(mut s) => {
                s.maintenance = on;
                true
            }
            None => false,
        }
    }

    pub fn deregister(&self, name: &str) -> Option<Server> {
        let removed = self.servers.remove(name).map(|(_, s)| s);
        if removed.is_some() {
            tracing::info!(server = %name, "server deregistered");
        }
        removed
    }

    /// Fresh listener start: nothing is registered yet.
    pub fn reset_statuses(&self) {
        for mut s in self.servers.iter_mut() {
            s.status = ServerStatus::Unregistered;
        }
    }

    /// Configured `(host, port)` of a server; resolution is left to the transport.
    pub fn target(&self, name: &str) -> Result<(String, u16)> {
        self.servers
            .get(name)
            .map(|s| (s.host.clone(), s.port))
            .ok_or_else(|| DcsBusError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use serde_json::json;

    use dcsbus_core::ErrorCode;

    use super::*;
    use crate::config::InstallationConfig;
    use crate::registry::ConfigCatalog;

    fn inst(id: &str, name: &str, port: u16) -> InstallationConfig {
        InstallationConfig {
            id: id.into(),
            server_name: name.into(),
            dcs_host: "127.0.0.1".into(),
            dcs_port: port,
        }
    }

    fn registration(name: &str, version: &str) -> Envelope {
        Envelope::new(name, "registerDCSServer")
            .with_field("hook_version", json!(version))
            .with_field("host", json!("127.0.0.1"))
            .with_field("port", json!(6666))
            .with_field("dcs_version", json!("2.8.1"))
            .with_field("options", json!({"plugins": {}}))
            .with_field("serverSettings", json!({"name": name}))
    }

    struct Fixture {
        dir: tempfile::TempDir,
        catalog: Arc<ConfigCatalog>,
        store: Arc<ServerStore>,
        registry: ServerRegistry,
    }

    fn fixture(installations: &[InstallationConfig]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ServerStore::open(&dir.path().join("reg.sqlite"), 2).unwrap());
        let catalog = Arc::new(ConfigCatalog::new(installations));
        let registry = ServerRegistry::new(catalog.clone(), Arc::clone(&store), "agentA", "1.1");
        registry.init_from_catalog();
        Fixture {
            dir,
            catalog,
            store,
            registry,
        }
    }

    fn endpoint() -> EndpointIdentity {
        EndpointIdentity {
            agent: "agentA".into(),
            host: "127.0.0.1".into(),
            port: 6666,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        assert_eq!(f.registry.status("Alpha"), Some(ServerStatus::Unregistered));

        f.registry.register(&registration("Alpha", "1.1")).await.unwrap();
        let first = f.registry.get("Alpha").unwrap();
        f.registry.register(&registration("Alpha", "1.1")).await.unwrap();
        let second = f.registry.get("Alpha").unwrap();

        assert_eq!(first, second);
        assert_eq!(second.status, ServerStatus::Stopped);
        assert_eq!(second.dcs_version.as_deref(), Some("2.8.1"));
        assert_eq!(f.store.count().unwrap(), 1);
        assert!(f.registry.is_registered("Alpha"));
    }

    #[tokio::test]
    async fn loaded_mission_sets_paused_or_running() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        let paused = registration("Alpha", "1.1")
            .with_field("current_mission", json!("Caucasus.miz"))
            .with_field("pause", json!(true));
        assert_eq!(f.registry.register(&paused).await.unwrap(), ServerStatus::Paused);

        let running =
            registration("Alpha", "1.1").with_field("current_mission", json!("Caucasus.miz"));
        assert_eq!(f.registry.register(&running).await.unwrap(), ServerStatus::Running);
    }

    #[tokio::test]
    async fn version_mismatch_does_not_mutate() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        let err = f.registry.register(&registration("Alpha", "0.9")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionMismatch);
        assert_eq!(f.registry.status("Alpha"), Some(ServerStatus::Unregistered));
        assert_eq!(f.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn outdated_hook_is_a_version_mismatch_even_without_endpoint() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        let old =
            Envelope::new("Alpha", "registerDCSServer").with_field("hook_version", json!(1.0));
        let err = f.registry.register(&old).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionMismatch);

        let unversioned = Envelope::new("Alpha", "registerDCSServer");
        let err = f.registry.register(&unversioned).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionMismatch);
    }

    #[tokio::test]
    async fn store_failure_fails_registration_without_mutation() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        let path = f.dir.path().join("reg.sqlite");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE servers")
            .unwrap();

        let err = f.registry.register(&registration("Alpha", "1.1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Store);
        assert_eq!(f.registry.status("Alpha"), Some(ServerStatus::Unregistered));
        assert!(!f.registry.is_registered("Alpha"));

        // Schema comes back; the next registration goes through.
        ServerStore::open(&path, 1).unwrap();
        let status = f.registry.register(&registration("Alpha", "1.1")).await.unwrap();
        assert_eq!(status, ServerStatus::Stopped);
        assert_eq!(f.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_installation_is_not_found() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        let err = f.registry.register(&registration("Ghost", "1.1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(!f.registry.contains("Ghost"));
    }

    #[tokio::test]
    async fn rename_when_old_name_is_unclaimed() {
        let f = fixture(&[inst("DCS.a", "Foo", 6666)]);
        f.store.upsert(&endpoint(), "Foo").unwrap();
        f.registry.set_maintenance("Foo", true);

        // The node was renamed on disk.
        f.catalog.reload(&[inst("DCS.a", "Bar", 6666)]);
        f.registry.register(&registration("Bar", "1.1")).await.unwrap();

        assert!(!f.registry.contains("Foo"));
        let bar = f.registry.get("Bar").unwrap();
        assert_eq!(bar.name, "Bar");
        assert!(bar.maintenance);
        assert_eq!(f.store.server_name_at(&endpoint()).unwrap().as_deref(), Some("Bar"));
        assert_eq!(f.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn port_conflict_leaves_no_entry_behind() {
        let f = fixture(&[inst("DCS.a", "Foo", 6666), inst("DCS.b", "Bar", 6667)]);
        f.store.upsert(&endpoint(), "Foo").unwrap();
        assert!(f.registry.contains("Bar"));

        let err = f.registry.register(&registration("Bar", "1.1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PortConflict);
        assert!(!f.registry.contains("Bar"));
        assert!(f.registry.contains("Foo"));
        assert!(f.store.get("Bar").unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_events_move_status() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        f.registry.register(&registration("Alpha", "1.1")).await.unwrap();

        let load = Envelope::new("Alpha", "onMissionLoadBegin");
        assert_eq!(f.registry.apply_event(&load), Some(ServerStatus::Loading));
        let resume = Envelope::new("Alpha", "onSimulationResume");
        assert_eq!(f.registry.apply_event(&resume), Some(ServerStatus::Running));
        assert_eq!(f.registry.apply_event(&Envelope::new("Alpha", "getVariable")), None);
        assert_eq!(f.registry.apply_event(&Envelope::new("Ghost", "onShutdown")), None);
    }

    #[tokio::test]
    async fn shutdown_and_reset_reject_commands() {
        let f = fixture(&[inst("DCS.a", "Alpha", 6666)]);
        f.registry.register(&registration("Alpha", "1.1")).await.unwrap();
        assert!(f.registry.set_status("Alpha", ServerStatus::Shutdown));
        assert!(!f.registry.is_registered("Alpha"));
        let err = f.registry.ensure_registered("Alpha").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnregisteredServer);

        f.registry.set_status("Alpha", ServerStatus::Running);
        f.registry.reset_statuses();
        assert_eq!(f.registry.status("Alpha"), Some(ServerStatus::Unregistered));
        assert!(f.registry.deregister("Alpha").is_some());
        assert_eq!(f.registry.target("Alpha").unwrap_err().code(), ErrorCode::NotFound);
    }
}
