//! pyps CLI
//!
//! Command-line interface for the pyps daemon and for one-shot offline
//! reconciliation of a package index.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pyps_core::{IndexContext, ServerConfig};
use pyps_indexer::{ProjectDetail, SyncReport};
use pyps_ipc::{ErrorCode, IpcClient, IpcError, Request, Response, ResponseData};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyps")]
#[command(about = "pyps - simple package index synchronization")]
#[command(version)]
struct Cli {
    /// Daemon socket (default: from config)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pyps daemon
    Start {
        /// Distribution tree (default: from config)
        base_dir: Option<PathBuf>,

        /// Run in foreground (for debugging)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the pyps daemon
    Stop,

    /// Show daemon status
    Status,

    /// Show index counts
    Stats {
        /// Break the counts down by sub-index
        #[arg(long)]
        per_sub_index: bool,
    },

    /// List projects
    Projects {
        /// Sub-index prefix (default: whole index)
        #[arg(default_value = "")]
        sub_index: String,
    },

    /// Show the files and versions of a project
    Detail {
        project: String,

        #[arg(long, default_value = "")]
        sub_index: String,
    },

    /// Print the core metadata of a distribution file
    Metadata {
        filename: String,

        #[arg(long, default_value = "")]
        sub_index: String,
    },

    /// Ask the daemon to reconcile now
    Sync,

    /// Reconcile an index without a daemon
    Index {
        /// Distribution tree (default: from config)
        base_dir: Option<PathBuf>,
    },

    /// Check if daemon is running
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Simple logging for CLI
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt().with_target(false).init();
    }

    let cli = Cli::parse();
    let config = ServerConfig::load();
    let client = IpcClient::with_socket_path(
        cli.socket
            .clone()
            .unwrap_or_else(|| config.socket_path.clone()),
    );

    match cli.command {
        Commands::Start {
            base_dir,
            foreground,
        } => cmd_start(&client, base_dir, foreground).await,
        Commands::Stop => cmd_stop(&client).await,
        Commands::Status => cmd_status(&client).await,
        Commands::Stats { per_sub_index } => cmd_stats(&client, per_sub_index, cli.json).await,
        Commands::Projects { sub_index } => cmd_projects(&client, &sub_index, cli.json).await,
        Commands::Detail { project, sub_index } => {
            cmd_detail(&client, &project, &sub_index, cli.json).await
        }
        Commands::Metadata {
            filename,
            sub_index,
        } => cmd_metadata(&client, &filename, &sub_index).await,
        Commands::Sync => cmd_sync(&client).await,
        Commands::Index { base_dir } => cmd_index(config, base_dir).await,
        Commands::Ping => cmd_ping(&client).await,
    }
}

async fn cmd_start(client: &IpcClient, base_dir: Option<PathBuf>, foreground: bool) -> Result<()> {
    let mut command = std::process::Command::new("pyps-daemon");
    if let Some(base_dir) = base_dir {
        command.arg(base_dir.canonicalize().context("Invalid base directory")?);
    }

    if foreground {
        println!("Starting pyps daemon in foreground...");
        println!("Press Ctrl+C to stop.");

        let status = command
            .status()
            .context("Failed to start daemon. Is pyps-daemon in PATH?")?;

        if !status.success() {
            anyhow::bail!("Daemon exited with error");
        }
    } else {
        if client.is_daemon_running() {
            println!("pyps daemon is already running.");
            return Ok(());
        }

        let child = command
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("Failed to start daemon")?;

        println!("✓ pyps daemon started (PID: {})", child.id());
    }

    Ok(())
}

async fn cmd_stop(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("pyps daemon is not running.");
        return Ok(());
    }

    match client.request(Request::Shutdown).await {
        Ok(Response::Ack) => {
            println!("✓ pyps daemon stopping...");

            // Wait a moment for cleanup
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;

            if !client.is_daemon_running() {
                println!("✓ Daemon stopped.");
            }
        }
        Ok(resp) => {
            println!("Unexpected response: {:?}", resp);
        }
        Err(e) => {
            println!("Failed to stop daemon: {}", e);
        }
    }

    Ok(())
}

async fn cmd_status(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("pyps daemon is not running.");
        println!("\nStart with: pyps start");
        return Ok(());
    }

    match client.get_status().await {
        Ok(ResponseData::Status {
            version,
            uptime_secs,
            base_dir,
            watching,
            last_sync,
            requests_total,
        }) => {
            println!("pyps Daemon v{}", version);
            println!();
            println!("  Status:     Running");
            println!("  Uptime:     {}", format_duration(uptime_secs));
            println!("  Index:      {}", base_dir.display());
            println!("  Watching:   {}", if watching { "yes" } else { "no" });
            println!(
                "  Last sync:  {}",
                last_sync.as_deref().unwrap_or("never")
            );
            println!();
            println!("  Requests:   {}", requests_total);
        }
        Ok(_) => {
            println!("Unexpected status response");
        }
        Err(e) => {
            println!("Failed to get status: {}", e);
        }
    }

    Ok(())
}

async fn cmd_stats(client: &IpcClient, per_sub_index: bool, json: bool) -> Result<()> {
    if per_sub_index {
        let entries = client.stats_per_sub_index().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }
        println!("{:<24} {:>14} {:>10}", "SUB-INDEX", "DISTRIBUTIONS", "PROJECTS");
        for entry in entries {
            let name = if entry.sub_index.is_empty() {
                "(root)"
            } else {
                entry.sub_index.as_str()
            };
            println!(
                "{:<24} {:>14} {:>10}",
                name, entry.distributions, entry.projects
            );
        }
    } else {
        let stats = client.stats().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }
        println!("  Distributions: {}", stats.distributions);
        println!("  Projects:      {}", stats.projects);
        println!("  Sub-indexes:   {}", stats.sub_indexes);
    }

    Ok(())
}

async fn cmd_projects(client: &IpcClient, sub_index: &str, json: bool) -> Result<()> {
    match client.list_projects(sub_index).await {
        Ok(list) if json => println!("{}", serde_json::to_string_pretty(&list)?),
        Ok(list) => {
            for name in list.names() {
                println!("{}", name);
            }
        }
        Err(e) if e.code() == Some(ErrorCode::NotFound) => {
            println!("✗ No projects under '{}'", sub_index);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_detail(client: &IpcClient, project: &str, sub_index: &str, json: bool) -> Result<()> {
    match client.project_detail(project, sub_index).await {
        Ok(detail) if json => println!("{}", serde_json::to_string_pretty(&detail)?),
        Ok(detail) => print_detail(&detail),
        Err(IpcError::Remote {
            code: ErrorCode::NotCanonical,
            message,
        }) => {
            println!("✗ '{}' is not canonical, did you mean '{}'?", project, message);
        }
        Err(e) if e.code() == Some(ErrorCode::NotFound) => {
            println!("✗ No files for project '{}'", project);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_detail(detail: &ProjectDetail) {
    println!("{}", detail.name);
    println!("  Versions: {}", detail.versions.join(", "));
    println!();
    for file in &detail.files {
        println!(
            "  {}  {}  {}",
            file.sha256().unwrap_or("-"),
            file.filename,
            file.requires_python.as_deref().unwrap_or("")
        );
    }
}

async fn cmd_metadata(client: &IpcClient, filename: &str, sub_index: &str) -> Result<()> {
    match client.metadata(filename, sub_index).await {
        Ok(content) => print!("{}", String::from_utf8_lossy(&content)),
        Err(e) if e.code() == Some(ErrorCode::NotFound) => {
            println!("✗ No metadata for '{}'", filename);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_sync(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("✗ Daemon not running. Use `pyps index` to sync offline.");
        return Ok(());
    }

    let report = client.sync().await?;
    print_report(&report);
    Ok(())
}

async fn cmd_index(mut config: ServerConfig, base_dir: Option<PathBuf>) -> Result<()> {
    if let Some(base_dir) = base_dir {
        config.base_dir = base_dir;
    }
    println!("Indexing {}", config.base_dir.display());

    let context = IndexContext::open(config).context("Failed to open index")?;
    let report = context.sync().await?;
    print_report(&report);

    let stats = context.stats().await?;
    println!(
        "  Index now holds {} distributions of {} projects in {} sub-indexes",
        stats.distributions, stats.projects, stats.sub_indexes
    );
    context.shutdown().await;
    Ok(())
}

fn print_report(report: &SyncReport) {
    if !report.changed() {
        println!("✓ Index up to date");
        return;
    }
    println!("✓ Index updated");
    println!("  Added:     {}", report.added);
    println!("  Removed:   {}", report.removed);
    println!("  Relinked:  {}", report.relinked);
    println!("  Unlinked:  {}", report.unlinked);
    if report.conflicts + report.invalid + report.store_failures > 0 {
        println!(
            "✗ Skipped {} conflicting, {} invalid, {} unstorable files (see log)",
            report.conflicts, report.invalid, report.store_failures
        );
    }
}

async fn cmd_ping(client: &IpcClient) -> Result<()> {
    if !client.is_daemon_running() {
        println!("✗ Daemon not running");
        return Ok(());
    }

    let start = std::time::Instant::now();
    match client.request(Request::Ping).await {
        Ok(Response::Ok {
            data: Some(ResponseData::Pong { .. }),
        }) => {
            let elapsed = start.elapsed();
            println!("✓ Pong! ({:.2}ms)", elapsed.as_secs_f64() * 1000.0);
        }
        Ok(_) => {
            println!("✗ Unexpected response");
        }
        Err(e) => {
            println!("✗ Error: {}", e);
        }
    }

    Ok(())
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
