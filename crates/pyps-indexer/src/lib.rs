//! pyps Indexer
//!
//! This crate provides the sync engine behind a simple package index:
//! - Reading wheels and source distributions (name, version, metadata, hashes)
//! - Scanning a source tree into sub-indexes
//! - A content-addressable link store with metadata sidecars
//! - An SQLite index reconciled against the tree, with a bounded query gate
//! - File watching with a debounced reconciliation trigger

pub mod database;
pub mod dist;
mod error;
pub mod models;
pub mod scanner;
pub mod store;
pub mod watcher;

pub use database::{Database, DatabaseOptions, SyncReport};
pub use dist::{DistributionError, DistributionInfo, DistributionReader};
pub use error::IndexerError;
pub use models::{
    FileDescriptor, Meta, ProjectDetail, ProjectList, ProjectName, Stats, SubIndexStats, Yanked,
};
pub use scanner::{ScanEntry, TreeScanner};
pub use store::{FileStore, StoreError};
pub use watcher::{ChangeHandler, DebounceState, Debouncer, FileWatcher, WatcherOptions};
