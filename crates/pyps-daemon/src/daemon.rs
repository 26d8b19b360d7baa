//! Daemon lifecycle management.

use anyhow::{Context, Result};
use pyps_core::{IndexContext, ServerConfig};
use pyps_ipc::IpcServer;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::handler::DaemonHandler;
use crate::signals;

/// The main daemon process
pub struct Daemon {
    config: ServerConfig,
    shutdown_tx: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    start_time: std::time::Instant,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: ServerConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create cache directories")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            shutdown_tx,
            is_running: Arc::new(AtomicBool::new(false)),
            start_time: std::time::Instant::now(),
        })
    }

    /// Run the daemon
    pub async fn run(&self) -> Result<()> {
        // Check single instance
        acquire_pid_lock(&self.config.pid_file)?;

        self.is_running.store(true, Ordering::SeqCst);

        tracing::info!(
            socket = %self.config.socket_path.display(),
            base_dir = %self.config.base_dir.display(),
            "Daemon starting"
        );

        let context = Arc::new(
            IndexContext::open(self.config.clone()).context("Failed to open index")?,
        );

        let report = context.sync().await.context("Initial sync failed")?;
        tracing::info!(
            added = report.added,
            removed = report.removed,
            "Initial sync complete"
        );

        if self.config.watch {
            context
                .start_watching()
                .await
                .context("Failed to start file watcher")?;
        }

        let handler = Arc::new(DaemonHandler::new(
            context.clone(),
            self.shutdown_tx.clone(),
            self.start_time,
        ));

        let ipc_server = IpcServer::new(&self.config.socket_path, handler)
            .await
            .context("Failed to create IPC server")?;

        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            result = ipc_server.run() => {
                if let Err(e) = result {
                    tracing::error!("IPC server error: {}", e);
                }
            }
            _ = signals::wait_for_shutdown(shutdown_rx) => {
                tracing::info!("Shutdown signal received");
            }
        }

        context.shutdown().await;
        self.cleanup();

        Ok(())
    }

    /// Cleanup resources on shutdown
    fn cleanup(&self) {
        tracing::info!("Cleaning up...");

        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }

        if self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }

        self.is_running.store(false, Ordering::SeqCst);

        tracing::info!("Cleanup complete");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if self.is_running.load(Ordering::SeqCst) && self.config.pid_file.exists() {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }
    }
}

/// Write our PID to `pid_file`, refusing if a live process already holds it.
fn acquire_pid_lock(pid_file: &Path) -> Result<()> {
    if pid_file.exists() {
        if let Ok(pid_str) = std::fs::read_to_string(pid_file) {
            if let Ok(pid) = pid_str.trim().parse::<u32>() {
                if pid != std::process::id() && is_process_running(pid) {
                    anyhow::bail!("Daemon already running (PID: {})", pid);
                }
            }
        }
        // Stale PID file
        std::fs::remove_file(pid_file)?;
    }

    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_file, std::process::id().to_string())?;

    tracing::debug!(pid = std::process::id(), "PID lock acquired");

    Ok(())
}

/// Check if a process is running by PID
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) only checks existence
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
