//! Explicitly owned index state: database handles, store, scanner and watcher.

use crate::{CoreError, ServerConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pyps_indexer::dist::canonicalize_name;
use pyps_indexer::{
    ChangeHandler, Database, DatabaseOptions, DistributionReader, FileStore, FileWatcher,
    IndexerError, ProjectDetail, ProjectList, Stats, SubIndexStats, SyncReport, TreeScanner,
    WatcherOptions,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};

/// Everything needed to reconcile and query one index.
pub struct IndexContext {
    config: ServerConfig,
    writer: Database,
    reader: Database,
    store: FileStore,
    scanner: TreeScanner,
    dist_reader: DistributionReader,
    watcher: Mutex<Option<FileWatcher>>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl IndexContext {
    /// Open the database and store described by `config`.
    ///
    /// The writer handle creates the schema, so the read-only handle can
    /// open right after it. No reconciliation runs yet.
    pub fn open(config: ServerConfig) -> Result<Self, CoreError> {
        if !config.base_dir.is_dir() {
            return Err(CoreError::Config(format!(
                "Base directory {} does not exist",
                config.base_dir.display()
            )));
        }
        config.ensure_dirs()?;

        let db_path = config.database_path();
        let writer = Database::open(&db_path, DatabaseOptions::writer())?;
        let reader = Database::open(
            &db_path,
            DatabaseOptions {
                read_only: true,
                max_connections: config.max_connections,
                max_concurrency: config.max_concurrency,
            },
        )?;
        let store = FileStore::new(config.files_dir())?;
        let scanner = TreeScanner::new(&config.base_dir)
            .exclude(config.cache_dir())
            .exclude(config.files_dir());

        tracing::info!(
            base_dir = ?scanner.root(),
            files_dir = ?store.dir(),
            database = ?db_path,
            "Index context ready"
        );

        Ok(Self {
            config,
            writer,
            reader,
            store,
            scanner,
            dist_reader: DistributionReader::new(),
            watcher: Mutex::new(None),
            last_sync: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Root of the distribution tree
    pub fn base_dir(&self) -> PathBuf {
        self.scanner.root().to_path_buf()
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Reconcile the index with the tree now.
    pub async fn sync(&self) -> Result<SyncReport, CoreError> {
        let report = self
            .writer
            .update(&self.scanner, &self.dist_reader, &self.store)
            .await?;
        *self.last_sync.write().await = Some(Utc::now());
        Ok(report)
    }

    /// Completion time of the last successful reconciliation in this process.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    /// Start reconciling on filesystem changes. No-op if already watching.
    pub async fn start_watching(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return Ok(());
        }

        let options = WatcherOptions {
            quiet: self.config.quiet_time(),
            ..WatcherOptions::default()
        }
        .ignore(self.config.cache_dir())
        .ignore(self.config.files_dir())
        .ignore_database(&self.config.database_path());

        let handler = Arc::new(SyncOnChange {
            context: Arc::downgrade(self),
        });
        *watcher = Some(FileWatcher::start(self.scanner.root(), options, handler)?);
        Ok(())
    }

    pub async fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .await
            .as_ref()
            .is_some_and(FileWatcher::is_running)
    }

    pub async fn stop_watching(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.stop();
        }
    }

    /// Stop watching and refuse further datastore operations.
    pub async fn shutdown(&self) {
        self.stop_watching().await;
        self.reader.close();
        self.writer.close();
        tracing::info!("Index context closed");
    }

    /// Projects under a sub-index; an empty listing is `NotFound`.
    pub async fn list_projects(&self, sub_index: &str) -> Result<ProjectList, CoreError> {
        let list = self.reader.list_projects(sub_index).await?;
        if list.projects.is_empty() {
            return Err(CoreError::NotFound(format!("No projects under '{sub_index}'")));
        }
        Ok(list)
    }

    /// Detail of a canonically named project; a project without files is
    /// `NotFound`.
    pub async fn project_detail(
        &self,
        project: &str,
        sub_index: &str,
    ) -> Result<ProjectDetail, CoreError> {
        let canonical = canonicalize_name(project);
        if canonical != project {
            return Err(CoreError::NotCanonical { canonical });
        }

        let detail = self.reader.project_detail(project, sub_index).await?;
        if detail.files.is_empty() {
            return Err(CoreError::NotFound(format!("No files for project {project}")));
        }
        Ok(detail)
    }

    /// Core metadata of a distribution file.
    pub async fn metadata(&self, filename: &str, sub_index: &str) -> Result<Vec<u8>, CoreError> {
        self.reader
            .metadata(&self.store, filename, sub_index)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("No metadata for {filename}")))
    }

    pub async fn stats(&self) -> Result<Stats, CoreError> {
        Ok(self.reader.stats().await?)
    }

    pub async fn stats_per_sub_index(&self) -> Result<Vec<SubIndexStats>, CoreError> {
        Ok(self.reader.stats_per_sub_index().await?)
    }
}

/// Watcher callback holding the context weakly; the context owns the watcher.
struct SyncOnChange {
    context: Weak<IndexContext>,
}

#[async_trait]
impl ChangeHandler for SyncOnChange {
    async fn on_change(&self, paths: BTreeSet<PathBuf>) -> Result<(), IndexerError> {
        let Some(context) = self.context.upgrade() else {
            return Ok(());
        };

        tracing::debug!(changed = paths.len(), "Tree changed, reconciling");
        match context.sync().await {
            Ok(_) => Ok(()),
            Err(CoreError::Indexer(e)) => Err(e),
            Err(e) => Err(IndexerError::Io(std::io::Error::other(e.to_string()))),
        }
    }
}
