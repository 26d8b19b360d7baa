//! Index datastore.
//!
//! One SQLite table maps `(filename, sub_index)` to the distribution's
//! project, version, hash and serialized file descriptor. Queries and the
//! reconciliation run on blocking threads behind an admission gate so no
//! more than `max_concurrency` operations touch the database at once.

mod pool;
mod schema;
mod sync;

pub use pool::ConnectionPool;
pub use sync::{source_path, SyncReport};

use crate::dist::DistributionReader;
use crate::models::{
    FileDescriptor, Meta, ProjectDetail, ProjectList, ProjectName, Stats, SubIndexStats,
};
use crate::scanner::TreeScanner;
use crate::store::{url_path, FileStore};
use crate::IndexerError;
use filetime::FileTime;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use sync::Reconciler;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Options for opening a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Open connections read-only
    pub read_only: bool,
    /// Pool size
    pub max_connections: usize,
    /// Operations admitted at once
    pub max_concurrency: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            max_connections: 4,
            max_concurrency: 4,
        }
    }
}

impl DatabaseOptions {
    /// Single writable connection; reconciliations never overlap.
    pub fn writer() -> Self {
        Self {
            read_only: false,
            max_connections: 1,
            max_concurrency: 1,
        }
    }
}

/// Handle to the index datastore. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    path: PathBuf,
    options: DatabaseOptions,
    pool: Arc<ConnectionPool>,
    gate: Arc<Semaphore>,
}

impl Database {
    /// Open the datastore at `path`.
    ///
    /// A writable handle creates the file and schema; a read-only handle
    /// requires both to exist already.
    pub fn open(path: impl Into<PathBuf>, options: DatabaseOptions) -> Result<Self, IndexerError> {
        let path = path.into();
        if !options.read_only {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = Arc::new(ConnectionPool::new(
            &path,
            options.read_only,
            options.max_connections,
        ));
        pool.with(|_| Ok(()))?;

        info!(
            path = ?path,
            read_only = options.read_only,
            max_connections = options.max_connections,
            max_concurrency = options.max_concurrency,
            "Opened index database"
        );

        Ok(Self {
            gate: Arc::new(Semaphore::new(options.max_concurrency.max(1))),
            path,
            options,
            pool,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Run `f` on a pooled connection once admitted by the gate.
    async fn run<T, F>(&self, f: F) -> Result<T, IndexerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, IndexerError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IndexerError::Closed)?;
        let pool = self.pool.clone();
        // Blocking threads log to the caller's subscriber.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        tokio::task::spawn_blocking(move || {
            tracing::dispatcher::with_default(&dispatch, || pool.with(f))
        })
        .await?
    }

    /// Reconcile the index with the source tree.
    ///
    /// Runs in a single transaction; on success the database file's mtime is
    /// bumped so [`Database::last_modified`] reflects the change.
    pub async fn update(
        &self,
        scanner: &TreeScanner,
        reader: &DistributionReader,
        store: &FileStore,
    ) -> Result<SyncReport, IndexerError> {
        if self.options.read_only {
            return Err(IndexerError::ReadOnly);
        }

        let scanner = scanner.clone();
        let reader = reader.clone();
        let store = store.clone();
        let path = self.path.clone();

        let report = self
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let report = Reconciler {
                    scanner: &scanner,
                    reader: &reader,
                    store: &store,
                }
                .run(&tx)?;
                tx.commit()?;
                touch(&path);
                Ok(report)
            })
            .await?;

        info!(
            added = report.added,
            removed = report.removed,
            relinked = report.relinked,
            conflicts = report.conflicts,
            invalid = report.invalid,
            "Index updated"
        );
        Ok(report)
    }

    /// Whole-index counts.
    pub async fn stats(&self) -> Result<Stats, IndexerError> {
        self.run(|conn| {
            let stats = conn.query_row(schema::STATS, [], |row| {
                Ok(Stats {
                    distributions: row.get::<_, i64>(0)? as u64,
                    projects: row.get::<_, i64>(1)? as u64,
                    sub_indexes: row.get::<_, i64>(2)? as u64,
                })
            })?;
            Ok(stats)
        })
        .await
    }

    /// Counts grouped by sub-index, ordered by sub-index.
    pub async fn stats_per_sub_index(&self) -> Result<Vec<SubIndexStats>, IndexerError> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(schema::STATS_PER_SUB_INDEX)?;
            let rows = stmt.query_map([], |row| {
                Ok(SubIndexStats {
                    sub_index: row.get(0)?,
                    distributions: row.get::<_, i64>(1)? as u64,
                    projects: row.get::<_, i64>(2)? as u64,
                })
            })?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
        .await
    }

    /// Projects visible under a sub-index prefix, sorted by name.
    pub async fn list_projects(&self, prefix: &str) -> Result<ProjectList, IndexerError> {
        let prefix = sub_index_prefix(prefix);
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(schema::PROJECT_LIST)?;
            let rows = stmt.query_map(params![prefix], |row| {
                Ok(ProjectName { name: row.get(0)? })
            })?;
            Ok(ProjectList {
                meta: Meta::default(),
                projects: rows.collect::<Result<_, _>>()?,
            })
        })
        .await
    }

    /// Files and versions of one project under a sub-index prefix.
    ///
    /// `project` must already be canonical. Files are unique by filename and
    /// sorted by it; versions are distinct and in string order.
    pub async fn project_detail(
        &self,
        project: &str,
        prefix: &str,
    ) -> Result<ProjectDetail, IndexerError> {
        let project = project.to_string();
        let prefix = sub_index_prefix(prefix);
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(schema::PROJECT_DETAIL)?;
            let rows = stmt.query_map(params![project, prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut versions = Vec::new();
            let mut files = Vec::new();
            for row in rows {
                let (version, blob) = row?;
                files.push(rmp_serde::from_slice::<FileDescriptor>(&blob)?);
                versions.push(version);
            }

            versions.sort();
            versions.dedup();

            Ok(ProjectDetail {
                meta: Meta::default(),
                name: project,
                versions,
                files,
            })
        })
        .await
    }

    /// Core metadata bytes for a file visible under a sub-index prefix.
    pub async fn metadata(
        &self,
        store: &FileStore,
        filename: &str,
        prefix: &str,
    ) -> Result<Option<Vec<u8>>, IndexerError> {
        let filename = filename.to_string();
        let prefix = sub_index_prefix(prefix);
        let store = store.clone();
        self.run(move |conn| {
            let sha256: Option<String> = conn
                .prepare_cached(schema::FIND_FILE)?
                .query_row(params![filename, prefix], |row| row.get(0))
                .optional()?;
            let Some(sha256) = sha256 else {
                debug!(filename = %filename, "No such file in index");
                return Ok(None);
            };
            Ok(store.read_metadata(&url_path(&filename, &sha256))?)
        })
        .await
    }

    /// Time of the last committed reconciliation.
    pub fn last_modified(&self) -> Result<SystemTime, IndexerError> {
        Ok(std::fs::metadata(&self.path)?.modified()?)
    }

    /// Refuse new operations and close idle connections.
    pub fn close(&self) {
        self.gate.close();
        self.pool.close();
        debug!(path = ?self.path, "Closed index database");
    }
}

/// Bump the mtime of a committed database file. Failure does not undo the
/// commit, so it is only logged.
fn touch(path: &Path) {
    if let Err(e) = filetime::set_file_mtime(path, FileTime::now()) {
        warn!(path = ?path, error = %e, "Failed to bump database mtime");
    }
}

/// Normalize a sub-index prefix to `""` or `"name/"`.
pub fn sub_index_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}

#[cfg(test)]
mod tests;
