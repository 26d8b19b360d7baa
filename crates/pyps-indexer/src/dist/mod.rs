//! Distribution reader.
//!
//! Opens a single wheel or source distribution, validates it, and extracts
//! the canonical project name, version, Python constraint and content hashes.

mod filename;
mod metadata;
mod normalize;

pub use filename::{DistributionKind, SdistFilename, WheelFilename};
pub use metadata::CoreMetadata;
pub use normalize::{canonicalize_name, canonicalize_version, parse_version};

use crate::models::{sha256_hashes, FileDescriptor};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

/// Read block size for content hashing.
const HASH_BLOCK_SIZE: usize = 16 * 1024;

/// Upper bound for an extracted metadata member.
const MAX_METADATA_SIZE: u64 = 16 * 1024 * 1024;

/// Errors produced while reading a distribution.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// Not a recognized archive; callers skip these silently
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(PathBuf),

    /// Looked like a distribution but could not be parsed
    #[error("Invalid distribution {path}: {cause}")]
    InvalidDistribution { path: PathBuf, cause: String },

    /// I/O error outside of archive parsing (file vanished, unreadable)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DistributionError {
    fn invalid(path: &Path, cause: impl ToString) -> Self {
        DistributionError::InvalidDistribution {
            path: path.to_path_buf(),
            cause: cause.to_string(),
        }
    }

    /// True if the file disappeared while being read.
    pub fn is_vanished(&self) -> bool {
        matches!(self, DistributionError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Everything extracted from one distribution file.
#[derive(Debug, Clone)]
pub struct DistributionInfo {
    /// Canonicalized project name
    pub project: String,
    /// Canonicalized version
    pub version: String,
    /// SHA-256 hex digest of the whole file
    pub sha256: String,
    /// Descriptor served to clients; `url` is filled in by the store
    pub descriptor: FileDescriptor,
    /// Raw core metadata bytes
    pub metadata: Vec<u8>,
}

/// Reads wheels and source distributions.
#[derive(Debug, Clone, Default)]
pub struct DistributionReader;

impl DistributionReader {
    pub fn new() -> Self {
        Self
    }

    /// Read and validate a distribution file.
    pub fn read(&self, path: &Path) -> Result<DistributionInfo, DistributionError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DistributionError::UnsupportedFormat(path.to_path_buf()))?;

        let kind = DistributionKind::detect(filename)
            .ok_or_else(|| DistributionError::UnsupportedFormat(path.to_path_buf()))?;

        // Surface a vanished file as I/O, not as a corrupt archive.
        let stat = std::fs::metadata(path)?;

        let metadata = match kind {
            DistributionKind::Wheel => read_wheel_metadata(path, filename)?,
            DistributionKind::Sdist => read_sdist_metadata(path, filename)?,
        };

        let core = CoreMetadata::parse(&metadata);
        let name = core
            .name
            .as_deref()
            .ok_or_else(|| DistributionError::invalid(path, "metadata has no Name"))?;
        let raw_version = core
            .version
            .as_deref()
            .ok_or_else(|| DistributionError::invalid(path, "metadata has no Version"))?;
        let version = canonicalize_version(raw_version).ok_or_else(|| {
            DistributionError::invalid(path, format!("invalid version {raw_version:?}"))
        })?;
        let project = canonicalize_name(name);

        let sha256 = hash_file(path)?;

        let descriptor = FileDescriptor {
            filename: filename.to_string(),
            size: stat.len(),
            url: String::new(),
            hashes: sha256_hashes(sha256.clone()),
            requires_python: core.requires_python.clone(),
            yanked: None,
            core_metadata: Some(sha256_hashes(hash_bytes(&metadata))),
            upload_time: stat.modified().ok().map(format_upload_time),
        };

        debug!(path = ?path, project = %project, version = %version, "Read distribution");

        Ok(DistributionInfo {
            project,
            version,
            sha256,
            descriptor,
            metadata,
        })
    }
}

fn read_wheel_metadata(path: &Path, filename: &str) -> Result<Vec<u8>, DistributionError> {
    let wheel = WheelFilename::parse(filename).map_err(|e| DistributionError::invalid(path, e))?;
    let member = wheel.metadata_member();

    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| DistributionError::invalid(path, e))?;
    let entry = archive
        .by_name(&member)
        .map_err(|e| DistributionError::invalid(path, format!("{member}: {e}")))?;

    read_member(path, entry)
}

fn read_sdist_metadata(path: &Path, filename: &str) -> Result<Vec<u8>, DistributionError> {
    let sdist = SdistFilename::parse(filename).map_err(|e| DistributionError::invalid(path, e))?;
    let member = sdist.metadata_member();

    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| DistributionError::invalid(path, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| DistributionError::invalid(path, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| DistributionError::invalid(path, e))?;
        if entry_path == Path::new(&member) {
            return read_member(path, entry);
        }
    }

    Err(DistributionError::invalid(path, format!("{member} not found")))
}

fn read_member(path: &Path, reader: impl Read) -> Result<Vec<u8>, DistributionError> {
    let mut buf = Vec::new();
    reader
        .take(MAX_METADATA_SIZE + 1)
        .read_to_end(&mut buf)
        .map_err(|e| DistributionError::invalid(path, e))?;
    if buf.len() as u64 > MAX_METADATA_SIZE {
        return Err(DistributionError::invalid(
            path,
            format!("metadata member exceeds {MAX_METADATA_SIZE} bytes"),
        ));
    }
    Ok(buf)
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// RFC 3339, UTC, second precision, `Z` suffix.
pub fn format_upload_time(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
