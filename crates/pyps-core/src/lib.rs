//! pyps Core Components
//!
//! This crate provides the configuration and the owned index context
//! (database handles, file store, scanner and watcher) shared by the daemon
//! and the offline CLI.

mod config;
mod context;
mod error;

pub use config::{ServerConfig, CONFIG_ENV};
pub use context::IndexContext;
pub use error::CoreError;
