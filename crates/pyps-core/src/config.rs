//! Configuration for the pyps server.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PYPS_CONFIG";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root of the distribution tree
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Managed directory for the index and store (default: `base_dir/.cache`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Public file area (default: `cache_dir/files`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_dir: Option<PathBuf>,

    /// Index database file (default: `cache_dir/index.sqlite`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Unix socket path for IPC
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// PID file path
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Seconds without filesystem events before a reconciliation runs
    #[serde(default = "default_quiet_time_secs")]
    pub quiet_time_secs: u64,

    /// Read connections kept open
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Queries admitted at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Reconcile on filesystem changes
    #[serde(default = "default_watch")]
    pub watch: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/pyps.sock")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/pyps.pid")
}

fn default_quiet_time_secs() -> u64 {
    10
}

fn default_max_connections() -> usize {
    4
}

fn default_max_concurrency() -> usize {
    4
}

fn default_watch() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            cache_dir: None,
            files_dir: None,
            database: None,
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            quiet_time_secs: default_quiet_time_secs(),
            max_connections: default_max_connections(),
            max_concurrency: default_max_concurrency(),
            watch: default_watch(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Configuration rooted at `base_dir`, everything else default
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file, falling back to defaults, then apply
    /// `PYPS_*` environment overrides
    pub fn load() -> Self {
        let config_path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match config_path {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = ?path, "Failed to load config file: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Override directories from `PYPS_BASE_DIR` and `PYPS_CACHE_DIR`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_dir) = lookup("PYPS_BASE_DIR").filter(|v| !v.is_empty()) {
            self.base_dir = PathBuf::from(base_dir);
        }
        if let Some(cache_dir) = lookup("PYPS_CACHE_DIR").filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(cache_dir));
        }
    }

    /// Managed cache directory
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.join(".cache"),
        }
    }

    /// Public file area
    pub fn files_dir(&self) -> PathBuf {
        match &self.files_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.cache_dir().join("files"),
        }
    }

    /// Index database file
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => self.base_dir.join(path),
            None => self.cache_dir().join("index.sqlite"),
        }
    }

    pub fn quiet_time(&self) -> Duration {
        Duration::from_secs(self.quiet_time_secs)
    }

    /// Ensure managed directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.files_dir())?;
        if let Some(parent) = self.database_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pyps").join("config.yaml"))
}
