//! IPC protocol definitions for pyps daemon communication.
//!
//! Frames are a 4-byte little-endian length followed by a MessagePack body.
//! Bodies are always encoded with field names so optional fields can be
//! skipped; the server also accepts JSON bodies for debugging.

use pyps_indexer::{ProjectDetail, ProjectList, Stats, SubIndexStats, SyncReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request from the CLI (or a serving frontend) to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Projects under a sub-index prefix (`""` for all)
    ListProjects {
        #[serde(default)]
        sub_index: String,
    },

    /// Files and versions of one project
    ProjectDetail {
        project: String,
        #[serde(default)]
        sub_index: String,
    },

    /// Core metadata of one file
    Metadata {
        filename: String,
        #[serde(default)]
        sub_index: String,
    },

    /// Whole-index counts
    Stats,

    /// Counts per sub-index
    StatsPerSubIndex,

    /// Reconcile now instead of waiting for the watcher
    Sync,

    /// Get daemon status
    Status,

    /// Graceful shutdown
    Shutdown,

    /// Ping for health check
    Ping,
}

/// Response from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success with optional data
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },

    /// Acknowledgment for requests without a payload
    Ack,

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create a success response with no data
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    /// Create a success response with data
    pub fn ok_with(data: ResponseData) -> Self {
        Response::Ok { data: Some(data) }
    }

    /// Create an acknowledgment response
    pub fn ack() -> Self {
        Response::Ack
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// Redirect to the canonical form of a project name.
    pub fn not_canonical(canonical: impl Into<String>) -> Self {
        Self::error(ErrorCode::NotCanonical, canonical)
    }
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Project list
    Projects { list: ProjectList },

    /// Project detail
    Project { detail: ProjectDetail },

    /// Raw core metadata file
    Metadata { content: Vec<u8> },

    /// Whole-index counts
    Stats { stats: Stats },

    /// Per sub-index counts
    SubIndexStats { entries: Vec<SubIndexStats> },

    /// Result of a reconciliation
    Synced { report: SyncReport },

    /// Daemon status
    Status {
        version: String,
        uptime_secs: u64,
        base_dir: PathBuf,
        /// Whether the change watcher is active
        watching: bool,
        /// RFC 3339 time of the last committed reconciliation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_sync: Option<String>,
        /// Total requests handled
        #[serde(default)]
        requests_total: u64,
    },

    /// Pong response
    Pong { timestamp: i64 },
}

/// Error codes for error responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Nothing matches the request
    NotFound,
    /// Project name is not canonical; the message carries the canonical name
    NotCanonical,
    /// Request format is invalid
    InvalidRequest,
    /// Internal daemon error
    InternalError,
    /// Operation timed out
    Timeout,
    /// Daemon is shutting down
    ShuttingDown,
}

/// Encode a message body.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(message)
}
