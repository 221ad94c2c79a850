//! dcsbus controller
//!
//! Usage: `dcsbus-controller [config.yaml]` (default `dcsbus.yaml`).
//! Listens for node datagrams, asks every configured server to register once, and
//! runs until Ctrl-C.

use tracing_subscriber::{fmt, EnvFilter};

use dcsbus_controller::{config, Controller};
use dcsbus_core::error::Result;

const DEFAULT_CONFIG: &str = "dcsbus.yaml";

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(code = e.code().as_str(), error = %e, "dcsbus-controller failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::load_from_file(&path)?;

    let controller = Controller::new(cfg)?;
    let addr = controller.start().await?;
    tracing::info!(%addr, config = %path, "dcsbus-controller listening");

    let startup = controller.clone();
    tokio::spawn(async move {
        startup.register_servers().await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    controller.shutdown().await;
    Ok(())
}
