//! File system watcher that triggers debounced reconciliations.
//!
//! Events from `notify` are filtered against ignored paths (the file store
//! and the database files) and fed to a [`Debouncer`]. Once the tree has been
//! quiet for the configured interval, the accumulated paths are handed to a
//! [`ChangeHandler`] in one call.

use crate::IndexerError;
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default quiet interval before a burst of changes is handled.
pub const DEFAULT_QUIET_TIME: Duration = Duration::from_secs(10);

/// Receives one call per burst of file system changes.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn on_change(&self, paths: BTreeSet<PathBuf>) -> Result<(), IndexerError>;
}

/// Debounce state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// No pending changes
    Idle,
    /// Changes pending; fire once `deadline` passes without new events
    PendingQuiet { deadline: Instant },
}

/// Collapses bursts of events into a single trigger.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    state: DebounceState,
    pending: BTreeSet<PathBuf>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            state: DebounceState::Idle,
            pending: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Record changed paths and push the deadline out to `now + quiet`.
    pub fn observe(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        self.pending.extend(paths);
        self.state = DebounceState::PendingQuiet {
            deadline: now + self.quiet,
        };
    }

    /// When the pending batch becomes ready, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::PendingQuiet { deadline } => Some(deadline),
        }
    }

    /// Take the accumulated paths if the quiet interval has elapsed.
    pub fn take_ready(&mut self, now: Instant) -> Option<BTreeSet<PathBuf>> {
        match self.state {
            DebounceState::PendingQuiet { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Number of distinct paths waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Quiet interval
    pub quiet: Duration,
    /// Paths whose events are dropped (subtrees included)
    pub ignore: Vec<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            quiet: DEFAULT_QUIET_TIME,
            ignore: Vec::new(),
        }
    }
}

impl WatcherOptions {
    /// Ignore a directory or file.
    pub fn ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignore.push(path.into());
        self
    }

    /// Ignore a SQLite database and its `-journal`, `-wal` and `-shm` files.
    pub fn ignore_database(mut self, db: &Path) -> Self {
        self.ignore.push(db.to_path_buf());
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut name: OsString = db.as_os_str().to_owned();
            name.push(suffix);
            self.ignore.push(PathBuf::from(name));
        }
        self
    }
}

/// Running watcher; dropping it stops event delivery.
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Watch `root` recursively and call `handler` once per quiet burst.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        root: &Path,
        options: WatcherOptions,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self, IndexerError> {
        let root = root
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(root.to_path_buf()))?;
        let ignore: Vec<PathBuf> = options.ignore.iter().map(|p| resolve(p)).collect();

        let (tx, rx) = mpsc::channel(1024);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let paths = relevant_paths(event, &ignore);
                    if !paths.is_empty() {
                        if let Err(e) = tx.blocking_send(paths) {
                            debug!(error = %e, "Watch loop gone, dropping event");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Watcher error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        info!(path = ?root, quiet = ?options.quiet, "Started watching");

        let task = spawn_loop(rx, Debouncer::new(options.quiet), handler);
        Ok(Self {
            root,
            _watcher: watcher,
            task,
        })
    }

    /// Watched root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and release the OS watch.
    pub fn stop(self) {
        self.task.abort();
        info!(path = ?self.root, "Stopped watching");
    }
}

/// Event paths worth a reconciliation.
fn relevant_paths(event: Event, ignore: &[PathBuf]) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
    }
    event
        .paths
        .into_iter()
        .filter(|path| !is_ignored(path, ignore))
        .collect()
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    ignore.iter().any(|ignored| path.starts_with(ignored))
}

/// Canonical form of a path that may not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(path) = path.canonicalize() {
        return path;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

pub(crate) fn spawn_loop(
    rx: mpsc::Receiver<Vec<PathBuf>>,
    debouncer: Debouncer,
    handler: Arc<dyn ChangeHandler>,
) -> JoinHandle<()> {
    tokio::spawn(watch_loop(rx, debouncer, handler))
}

async fn watch_loop(
    mut rx: mpsc::Receiver<Vec<PathBuf>>,
    mut debouncer: Debouncer,
    handler: Arc<dyn ChangeHandler>,
) {
    loop {
        let received = match debouncer.deadline() {
            Some(deadline) => tokio::select! {
                received = rx.recv() => received,
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(paths) = debouncer.take_ready(Instant::now()) {
                        dispatch(handler.as_ref(), paths).await;
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match received {
            Some(paths) => {
                debug!(count = paths.len(), "Change observed");
                debouncer.observe(paths, Instant::now());
            }
            None => {
                debug!(pending = debouncer.len(), "Event channel closed");
                break;
            }
        }
    }
}

async fn dispatch(handler: &dyn ChangeHandler, paths: BTreeSet<PathBuf>) {
    let count = paths.len();
    info!(paths = count, "Changes settled, reconciling");
    if let Err(e) = handler.on_change(paths).await {
        error!(error = %e, "Change handler failed");
    }
}
