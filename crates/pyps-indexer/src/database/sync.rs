//! Reconciliation of the source tree against the index.

use crate::dist::{DistributionError, DistributionReader};
use crate::scanner::{ScanEntry, TreeScanner};
use crate::store::{url_path, FileStore};
use crate::IndexerError;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::schema;

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// New rows inserted
    pub added: usize,
    /// Files skipped as not being distributions
    pub unsupported: usize,
    /// Files that looked like distributions but failed to parse
    pub invalid: usize,
    /// Files rejected because another copy with the same name differs
    pub conflicts: usize,
    /// Files the store could not register
    pub store_failures: usize,
    /// Rows deleted because their source file is gone
    pub removed: usize,
    /// Store entries pointed at a surviving copy
    pub relinked: usize,
    /// Store entries deleted with their last copy
    pub unlinked: usize,
}

impl SyncReport {
    /// True if the index contents changed.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Everything a reconciliation needs besides the connection.
pub(crate) struct Reconciler<'a> {
    pub scanner: &'a TreeScanner,
    pub reader: &'a DistributionReader,
    pub store: &'a FileStore,
}

impl Reconciler<'_> {
    /// Add new files, then drop rows for vanished ones, in one transaction.
    pub fn run(&self, tx: &Transaction<'_>) -> Result<SyncReport, IndexerError> {
        let mut report = SyncReport::default();
        self.add_new(tx, &mut report)?;
        self.remove_missing(tx, &mut report)?;
        Ok(report)
    }

    fn add_new(&self, tx: &Transaction<'_>, report: &mut SyncReport) -> Result<(), IndexerError> {
        for entry in self.scanner {
            self.add_one(tx, &entry, report)?;
        }
        Ok(())
    }

    fn add_one(
        &self,
        tx: &Transaction<'_>,
        entry: &ScanEntry,
        report: &mut SyncReport,
    ) -> Result<(), IndexerError> {
        let filename = entry.filename();

        let known: Vec<(String, String)> = {
            let mut stmt = tx.prepare_cached(schema::KNOWN_COPIES)?;
            let rows = stmt.query_map(params![filename], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        if known.iter().any(|(sub_index, _)| *sub_index == entry.sub_index) {
            return Ok(());
        }

        let info = match self.reader.read(&entry.path) {
            Ok(info) => info,
            Err(DistributionError::UnsupportedFormat(path)) => {
                debug!(path = ?path, "Skipping unsupported file");
                report.unsupported += 1;
                return Ok(());
            }
            Err(e) if e.is_vanished() => {
                debug!(path = ?entry.path, "File vanished before it could be read");
                return Ok(());
            }
            Err(e) => {
                error!(path = ?entry.path, error = %e, "Invalid distribution");
                report.invalid += 1;
                return Ok(());
            }
        };

        if let Some((sub_index, _)) = known.iter().find(|(_, sha256)| *sha256 != info.sha256) {
            error!(
                "Conflicting distribution {}: hash conflict with {}{}",
                entry.path.display(),
                sub_index,
                filename
            );
            report.conflicts += 1;
            return Ok(());
        }

        let url = match self.store.add(&entry.path, &info.sha256, &info.metadata) {
            Ok(url) => url,
            Err(e) => {
                error!(path = ?entry.path, error = %e, "Failed to add file to store");
                report.store_failures += 1;
                return Ok(());
            }
        };

        let mut descriptor = info.descriptor;
        descriptor.url = url;
        let blob = rmp_serde::to_vec_named(&descriptor)?;

        tx.prepare_cached(schema::STORE_DIST)?.execute(params![
            entry.sub_index,
            filename,
            info.sha256,
            info.project,
            info.version,
            blob
        ])?;

        info!(
            sub_index = %entry.sub_index,
            filename = %filename,
            project = %info.project,
            version = %info.version,
            "Added distribution"
        );
        report.added += 1;
        Ok(())
    }

    fn remove_missing(
        &self,
        tx: &Transaction<'_>,
        report: &mut SyncReport,
    ) -> Result<(), IndexerError> {
        let rows: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare_cached(schema::ALL_FILES)?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        let root = self.scanner.root();
        let mut orphaned = BTreeSet::new();
        for (filename, sub_index, sha256) in rows {
            if source_path(root, &sub_index, &filename).exists() {
                continue;
            }
            tx.prepare_cached(schema::REMOVE_DIST)?
                .execute(params![filename, sub_index])?;
            info!(sub_index = %sub_index, filename = %filename, "Removed distribution");
            report.removed += 1;
            orphaned.insert((filename, sha256));
        }

        for (filename, sha256) in orphaned {
            let url = url_path(&filename, &sha256);
            let survivor: Option<String> = tx
                .prepare_cached(schema::FIND_SURVIVOR)?
                .query_row(params![filename, sha256], |row| row.get(0))
                .optional()?;

            match survivor {
                Some(sub_index) => {
                    let target_alive = self
                        .store
                        .link_target(&url)
                        .is_some_and(|target| target.exists());
                    if target_alive {
                        continue;
                    }
                    let file = source_path(root, &sub_index, &filename);
                    match self.store.update_link(&file, &sha256) {
                        Ok(_) => report.relinked += 1,
                        Err(e) => warn!(url = %url, error = %e, "Failed to relink store entry"),
                    }
                }
                None => match self.store.remove(&url) {
                    Ok(()) => report.unlinked += 1,
                    Err(e) => warn!(url = %url, error = %e, "Failed to remove store entry"),
                },
            }
        }

        Ok(())
    }
}

/// Location of a source file recorded under `sub_index`.
pub fn source_path(root: &Path, sub_index: &str, filename: &str) -> PathBuf {
    let dir = sub_index.trim_end_matches('/');
    if dir.is_empty() {
        root.join(filename)
    } else {
        root.join(dir).join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_path() {
        let root = Path::new("/srv/pkgs");
        assert_eq!(
            source_path(root, "", "a.whl"),
            PathBuf::from("/srv/pkgs/a.whl")
        );
        assert_eq!(
            source_path(root, "ext/deep/", "a.whl"),
            PathBuf::from("/srv/pkgs/ext/deep/a.whl")
        );
    }

    #[test]
    fn test_report_changed() {
        assert!(!SyncReport::default().changed());
        let report = SyncReport {
            conflicts: 1,
            ..Default::default()
        };
        assert!(!report.changed());
        let report = SyncReport {
            removed: 1,
            ..Default::default()
        };
        assert!(report.changed());
    }
}
