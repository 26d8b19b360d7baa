//! pyps Daemon
//!
//! Background process that keeps a package index in sync with its
//! distribution tree and answers index queries over a Unix socket.

mod daemon;
mod handler;
mod signals;

use anyhow::Result;
use pyps_core::ServerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use daemon::Daemon;

/// Run the daemon
async fn run(config: ServerConfig) -> Result<()> {
    let daemon = Daemon::new(config)?;
    daemon.run().await
}

fn main() -> Result<()> {
    let mut config = ServerConfig::load();

    // Optional positional base directory
    if let Some(base_dir) = std::env::args_os().nth(1) {
        config.base_dir = PathBuf::from(base_dir);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting pyps daemon v{}", env!("CARGO_PKG_VERSION"));

    // Run async runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}
