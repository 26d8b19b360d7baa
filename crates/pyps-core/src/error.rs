//! Core error types for pyps.

use pyps_indexer::{IndexerError, StoreError};
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Indexing or query failure
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// Public file area failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Nothing to serve for the query
    #[error("Not found: {0}")]
    NotFound(String),

    /// Project name must be requested in canonical form
    #[error("Project name is not canonical, use {canonical}")]
    NotCanonical { canonical: String },
}
