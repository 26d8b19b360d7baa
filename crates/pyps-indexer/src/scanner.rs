//! Source tree scanner.
//!
//! Walks the source root and yields every candidate file with the sub-index
//! (relative directory) it belongs to. Managed directories such as the file
//! store are pruned so generated links are never scanned back in.

use ignore::{Walk, WalkBuilder};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A candidate file found in the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Relative directory with trailing `/`, empty at the root
    pub sub_index: String,
    /// Path to the file
    pub path: PathBuf,
}

impl ScanEntry {
    /// File name as a string (lossy for non UTF-8 names).
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Scanner over a source root.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    root: PathBuf,
    excluded: Vec<PathBuf>,
}

impl TreeScanner {
    /// Create a scanner for the given root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: resolve(root.into()),
            excluded: Vec::new(),
        }
    }

    /// Skip the subtree rooted at `dir`.
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(resolve(dir.into()));
        self
    }

    /// Root of the source tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Excluded subtrees.
    pub fn excluded(&self) -> &[PathBuf] {
        &self.excluded
    }

    /// Start a fresh traversal.
    ///
    /// Within a directory, files come first in name order, then each
    /// subdirectory in name order.
    pub fn iter(&self) -> ScanIter {
        let excluded = self.excluded.clone();
        let walk = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_path(|a, b| (a.is_dir(), a).cmp(&(b.is_dir(), b)))
            .filter_entry(move |entry| !excluded.iter().any(|dir| entry.path().starts_with(dir)))
            .build();

        ScanIter {
            walk,
            root: self.root.clone(),
        }
    }

    /// Sub-index for a file path under the root, `None` if outside it.
    pub fn sub_index_of(&self, file: &Path) -> Option<String> {
        sub_index_for(&self.root, file)
    }
}

impl<'a> IntoIterator for &'a TreeScanner {
    type Item = ScanEntry;
    type IntoIter = ScanIter;

    fn into_iter(self) -> ScanIter {
        self.iter()
    }
}

/// Lazy traversal of a source tree.
pub struct ScanIter {
    walk: Walk,
    root: PathBuf,
}

impl Iterator for ScanIter {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<ScanEntry> {
        for result in self.walk.by_ref() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Walk error");
                    continue;
                }
            };

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            let is_file =
                file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }

            let Some(sub_index) = sub_index_for(&self.root, entry.path()) else {
                continue;
            };

            return Some(ScanEntry {
                sub_index,
                path: entry.into_path(),
            });
        }
        None
    }
}

/// POSIX style relative directory of `file` with trailing `/`.
fn sub_index_for(root: &Path, file: &Path) -> Option<String> {
    let parent = file.parent()?.strip_prefix(root).ok()?;
    let parts: Vec<String> = parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        Some(String::new())
    } else {
        Some(format!("{}/", parts.join("/")))
    }
}

fn resolve(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap_or(path)
}
