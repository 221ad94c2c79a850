//! Controller config loader (strict parsing).

pub mod schema;

use std::fs;

use dcsbus_core::error::{DcsBusError, Result};

pub use schema::{ControllerConfig, ControllerSection, InstallationConfig, StoreSection};

pub fn load_from_file(path: &str) -> Result<ControllerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| DcsBusError::Config(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ControllerConfig> {
    let cfg: ControllerConfig = serde_yaml::from_str(s)
        .map_err(|e| DcsBusError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
