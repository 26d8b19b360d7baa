//! Content-addressable public file store.
//!
//! Layout: `<dir>/<first two hex chars of sha256>/<filename>` is a relative
//! symlink to one source file with that content, and `<…>.metadata` next to
//! it holds the extracted core metadata.

use filetime::FileTime;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Suffix of the metadata sidecar file.
pub const METADATA_SUFFIX: &str = ".metadata";

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Link target and link directory share no ancestor
    #[error("No common ancestor between {file} and {dir}")]
    NoCommonAncestor { file: PathBuf, dir: PathBuf },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Bucket directory for a content hash.
pub fn bucket(sha256: &str) -> &str {
    sha256.get(..2).unwrap_or(sha256)
}

/// Public URL path for a file with the given hash.
pub fn url_path(filename: &str, sha256: &str) -> String {
    format!("{}/{}", bucket(sha256), filename)
}

/// Manages the deduplicated link tree.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let dir = dir.canonicalize()?;
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Link and sidecar paths for a url path.
    pub fn paths(&self, url_path: &str) -> (PathBuf, PathBuf) {
        let link = self.dir.join(url_path);
        let mut sidecar = link.clone().into_os_string();
        sidecar.push(METADATA_SUFFIX);
        (link, PathBuf::from(sidecar))
    }

    /// Register a source file; returns its url path.
    ///
    /// Idempotent: an existing entry (even a dangling one) is left untouched.
    pub fn add(&self, file: &Path, sha256: &str, metadata: &[u8]) -> Result<String, StoreError> {
        let filename = file_name(file)?;
        let url = url_path(&filename, sha256);
        let (link, sidecar) = self.paths(&url);

        if link.symlink_metadata().is_ok() {
            debug!(url = %url, "Store entry already present");
            return Ok(url);
        }

        let parent = parent_of(&link);
        std::fs::create_dir_all(parent)?;
        let target = relative_to(file, parent)?;

        match symlink(&target, &link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(url),
            Err(e) => return Err(e.into()),
        }

        std::fs::write(&sidecar, metadata)?;
        copy_times(file, &sidecar)?;

        debug!(url = %url, target = ?target, "Created store entry");
        Ok(url)
    }

    /// Point an existing entry at another source file with the same content.
    pub fn update_link(&self, file: &Path, sha256: &str) -> Result<String, StoreError> {
        let filename = file_name(file)?;
        let url = url_path(&filename, sha256);
        let (link, sidecar) = self.paths(&url);

        let parent = parent_of(&link);
        std::fs::create_dir_all(parent)?;
        let target = relative_to(file, parent)?;

        // Swap through a temporary link so readers never see a missing entry.
        let staging = parent.join(format!(".{filename}.relink"));
        let _ = std::fs::remove_file(&staging);
        symlink(&target, &staging)?;
        std::fs::rename(&staging, &link)?;

        if sidecar.exists() {
            copy_times(file, &sidecar)?;
        }

        info!(url = %url, target = ?target, "Relinked store entry");
        Ok(url)
    }

    /// Remove an entry and its sidecar; missing files are fine.
    pub fn remove(&self, url_path: &str) -> Result<(), StoreError> {
        let (link, sidecar) = self.paths(url_path);
        remove_if_exists(&link)?;
        remove_if_exists(&sidecar)?;
        debug!(url = %url_path, "Removed store entry");
        Ok(())
    }

    /// Read the metadata sidecar for an entry.
    pub fn read_metadata(&self, url_path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let (_, sidecar) = self.paths(url_path);
        match std::fs::read(&sidecar) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolved link target for an entry, if the link exists.
    pub fn link_target(&self, url_path: &str) -> Option<PathBuf> {
        let (link, _) = self.paths(url_path);
        let target = std::fs::read_link(&link).ok()?;
        Some(parent_of(&link).join(target))
    }
}

/// Relative path from `dir` to `file`.
///
/// Walks `dir` and its ancestors; the first one that also contains `file`
/// decides how many `..` segments lead up to it.
pub fn relative_to(file: &Path, dir: &Path) -> Result<PathBuf, StoreError> {
    let no_ancestor = || StoreError::NoCommonAncestor {
        file: file.to_path_buf(),
        dir: dir.to_path_buf(),
    };

    if file.has_root() != dir.has_root() {
        return Err(no_ancestor());
    }

    let mut up = PathBuf::new();
    for ancestor in dir.ancestors() {
        if let Ok(rest) = file.strip_prefix(ancestor) {
            if rest.as_os_str().is_empty() {
                return Err(no_ancestor());
            }
            return Ok(up.join(rest));
        }
        up.push("..");
    }

    Err(no_ancestor())
}

fn file_name(file: &Path) -> Result<String, StoreError> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a file path: {}", file.display()),
            ))
        })
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

fn copy_times(from: &Path, to: &Path) -> io::Result<()> {
    let stat = std::fs::metadata(from)?;
    filetime::set_file_times(
        to,
        FileTime::from_last_access_time(&stat),
        FileTime::from_last_modification_time(&stat),
    )
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
