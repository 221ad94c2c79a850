use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use dcsbus_core::error::{DcsBusError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    pub version: u32,

    pub controller: ControllerSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub installations: Vec<InstallationConfig>,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(DcsBusError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.controller.validate()?;
        self.store.validate()?;

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for inst in &self.installations {
            inst.validate()?;
            if !ids.insert(inst.id.as_str()) {
                return Err(DcsBusError::Config(format!(
                    "duplicate installation id: {}",
                    inst.id
                )));
            }
            if !names.insert(inst.server_name.as_str()) {
                return Err(DcsBusError::Config(format!(
                    "duplicate server_name: {}",
                    inst.server_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Protocol version nodes must report at registration.
    pub hook_version: String,

    /// Identity of this controller host in persisted server records.
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Give each node more time to answer the startup registration round.
    #[serde(default)]
    pub slow_system: bool,
}

impl ControllerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.hook_version.trim().is_empty() {
            return Err(DcsBusError::Config(
                "controller.hook_version must not be empty".into(),
            ));
        }
        if self.agent.trim().is_empty() {
            return Err(DcsBusError::Config("controller.agent must not be empty".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|_| {
            DcsBusError::Config(format!(
                "controller.listen must be a valid SocketAddr: {}",
                self.listen
            ))
        })
    }

    /// Per-server budget for the startup registration round.
    pub fn register_secs_per_server(&self) -> u64 {
        if self.slow_system {
            5
        } else {
            3
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:10081".into()
}
fn default_agent() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".into())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl StoreSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.pool_size) {
            return Err(DcsBusError::Config(
                "store.pool_size must be between 1 and 64".into(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(DcsBusError::Config("store.path must not be empty".into()));
        }
        Ok(())
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("dcsbus.sqlite")
}
fn default_pool_size() -> usize {
    4
}

/// One local game-server installation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallationConfig {
    pub id: String,
    pub server_name: String,
    #[serde(default = "default_dcs_host")]
    pub dcs_host: String,
    pub dcs_port: u16,
}

impl InstallationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DcsBusError::Config("installation id must not be empty".into()));
        }
        if self.server_name.trim().is_empty() {
            return Err(DcsBusError::Config(format!(
                "installation {} has an empty server_name",
                self.id
            )));
        }
        if self.dcs_port == 0 {
            return Err(DcsBusError::Config(format!(
                "installation {} needs a non-zero dcs_port",
                self.id
            )));
        }
        Ok(())
    }
}

fn default_dcs_host() -> String {
    "127.0.0.1".into()
}
