use super::*;
use crate::dist::fixtures::{metadata_for, write_sdist, write_wheel, write_wheel_with};
use std::collections::BTreeMap;
use tempfile::{tempdir, TempDir};

struct Fixture {
    _temp_dir: TempDir,
    root: PathBuf,
    db: Database,
    scanner: TreeScanner,
    reader: DistributionReader,
    store: FileStore,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let cache = root.join(".cache");
        let store = FileStore::new(cache.join("files")).unwrap();
        let db = Database::open(cache.join("index.sqlite"), DatabaseOptions::writer()).unwrap();
        let scanner = TreeScanner::new(&root).exclude(&cache);

        Self {
            _temp_dir: temp_dir,
            root,
            db,
            scanner,
            reader: DistributionReader::new(),
            store,
        }
    }

    async fn sync(&self) -> SyncReport {
        self.db
            .update(&self.scanner, &self.reader, &self.store)
            .await
            .unwrap()
    }

    async fn projects(&self, prefix: &str) -> Vec<String> {
        let list = self.db.list_projects(prefix).await.unwrap();
        list.names().into_iter().map(str::to_string).collect()
    }

    /// Every entry under the store with its symlink target, if any.
    fn store_layout(&self) -> BTreeMap<PathBuf, Option<PathBuf>> {
        fn walk(dir: &Path, base: &Path, out: &mut BTreeMap<PathBuf, Option<PathBuf>>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                let relative = path.strip_prefix(base).unwrap().to_path_buf();
                let file_type = path.symlink_metadata().unwrap().file_type();
                if file_type.is_dir() {
                    out.insert(relative, None);
                    walk(&path, base, out);
                } else {
                    out.insert(relative, std::fs::read_link(&path).ok());
                }
            }
        }

        let mut layout = BTreeMap::new();
        walk(self.store.dir(), self.store.dir(), &mut layout);
        layout
    }

    fn link_target(&self, filename: &str, sha256: &str) -> Option<PathBuf> {
        self.store
            .link_target(&url_path(filename, sha256))
            .map(|p| p.canonicalize().unwrap())
    }
}

/// Log output captured from a scoped subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl LogBuffer {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn stats(distributions: u64, projects: u64, sub_indexes: u64) -> Stats {
    Stats {
        distributions,
        projects,
        sub_indexes,
    }
}

#[tokio::test]
async fn test_empty_index() {
    let fx = Fixture::new();
    let report = fx.sync().await;

    assert_eq!(report, SyncReport::default());
    assert_eq!(fx.db.stats().await.unwrap(), Stats::default());
    assert!(fx.projects("").await.is_empty());
    assert!(fx.db.stats_per_sub_index().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_across_sub_indexes() {
    let fx = Fixture::new();
    let root_copy = write_wheel(&fx.root, "pkgA", "1.0");
    let ext_copy = write_wheel(&fx.root.join("ext"), "pkgA", "1.0");
    write_sdist(&fx.root, "pkgB", "2.0");

    let report = fx.sync().await;
    assert_eq!(report.added, 3);
    assert_eq!(fx.db.stats().await.unwrap(), stats(3, 2, 2));
    assert_eq!(fx.projects("").await, vec!["pkga", "pkgb"]);
    assert_eq!(fx.projects("ext").await, vec!["pkga"]);

    // One store entry, pointing at the copy seen first.
    let sha256 = crate::dist::hash_file(&root_copy).unwrap();
    let filename = "pkgA-1.0-py3-none-any.whl";
    assert_eq!(fx.link_target(filename, &sha256), Some(root_copy.clone()));

    // Root copy gone: the entry moves to the ext copy.
    std::fs::remove_file(&root_copy).unwrap();
    let report = fx.sync().await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.relinked, 1);
    assert_eq!(fx.db.stats().await.unwrap(), stats(2, 2, 2));
    assert_eq!(fx.link_target(filename, &sha256), Some(ext_copy.clone()));
    assert_eq!(fx.projects("").await, vec!["pkga", "pkgb"]);

    // Last copy gone: the entry and its sidecar are removed.
    let (_, sidecar) = fx.store.paths(&url_path(filename, &sha256));
    assert!(sidecar.exists());
    std::fs::remove_file(&ext_copy).unwrap();
    let report = fx.sync().await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.unlinked, 1);
    assert_eq!(fx.db.stats().await.unwrap(), stats(1, 1, 1));
    assert_eq!(fx.projects("").await, vec!["pkgb"]);
    assert!(fx
        .store
        .link_target(&url_path(filename, &sha256))
        .is_none());
    assert!(!sidecar.exists());
    assert!(fx.projects("ext").await.is_empty());
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let fx = Fixture::new();
    write_wheel(&fx.root, "pkgA", "1.0");
    write_sdist(&fx.root.join("ext"), "pkgB", "2.0");
    write_wheel(&fx.root.join("mirror"), "pkgA", "1.0");

    fx.sync().await;
    let before = fx.db.stats().await.unwrap();
    let detail_before = fx.db.project_detail("pkga", "").await.unwrap();
    let layout_before = fx.store_layout();
    assert!(layout_before.values().any(Option::is_some));

    let report = fx.sync().await;
    assert!(!report.changed());
    assert_eq!(fx.db.stats().await.unwrap(), before);
    assert_eq!(fx.db.project_detail("pkga", "").await.unwrap(), detail_before);
    assert_eq!(fx.store_layout(), layout_before);
}

#[tokio::test]
async fn test_conflicting_copy_is_rejected() {
    let fx = Fixture::new();
    let metadata = metadata_for("pkgA", "1.0");
    let first = write_wheel_with(&fx.root, "pkgA", "1.0", &metadata, b"");
    write_wheel_with(&fx.root.join("ext"), "pkgA", "1.0", &metadata, b"different");

    let logs = LogBuffer::default();
    let report = {
        let _guard = logs.install();
        fx.sync().await
    };
    assert_eq!(report.added, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(fx.db.stats().await.unwrap(), stats(1, 1, 1));
    assert!(fx.projects("ext").await.is_empty());

    let output = logs.contents();
    let line = output
        .lines()
        .find(|line| line.contains("Conflicting distribution"))
        .expect("conflict should be logged");
    assert!(line.contains("ERROR"));
    assert!(line.contains("ext/pkgA-1.0-py3-none-any.whl"));
    assert!(line.contains("hash conflict with pkgA-1.0-py3-none-any.whl"));

    // Still rejected while the first copy is indexed.
    let report = fx.sync().await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.added, 0);

    // Once the first copy is gone the conflicting one can be indexed.
    std::fs::remove_file(&first).unwrap();
    fx.sync().await;
    let report = fx.sync().await;
    assert_eq!(report.conflicts, 0);
    assert_eq!(fx.projects("ext").await, vec!["pkga"]);
    assert_eq!(fx.db.stats().await.unwrap(), stats(1, 1, 1));
}

#[tokio::test]
async fn test_unsupported_and_invalid_files_are_skipped() {
    let fx = Fixture::new();
    std::fs::write(fx.root.join("README.txt"), "hello").unwrap();
    std::fs::write(fx.root.join("broken-1.0.tar.gz"), "").unwrap();
    write_wheel(&fx.root, "pkgA", "1.0");

    let report = fx.sync().await;
    assert_eq!(report.added, 1);
    assert_eq!(report.unsupported, 1);
    assert_eq!(report.invalid, 1);
    assert_eq!(fx.projects("").await, vec!["pkga"]);
}

#[tokio::test]
async fn test_store_is_not_scanned() {
    let fx = Fixture::new();
    write_wheel(&fx.root, "pkgA", "1.0");

    fx.sync().await;
    let report = fx.sync().await;
    assert_eq!(report, SyncReport::default());
    assert_eq!(fx.db.stats().await.unwrap(), stats(1, 1, 1));
}

#[tokio::test]
async fn test_project_detail() {
    let fx = Fixture::new();
    write_wheel(&fx.root, "pkgA", "1.10");
    write_wheel(&fx.root, "pkgA", "1.9");
    write_sdist(&fx.root, "pkgA", "1.9");
    write_wheel(&fx.root.join("ext"), "pkgA", "1.9");
    write_wheel(&fx.root, "pkgB", "2.0");
    fx.sync().await;

    let detail = fx.db.project_detail("pkga", "").await.unwrap();
    assert_eq!(detail.name, "pkga");
    assert_eq!(detail.meta.api_version, "1.1");
    assert_eq!(detail.versions, vec!["1.10", "1.9"]);
    let filenames: Vec<_> = detail.files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(
        filenames,
        vec![
            "pkgA-1.10-py3-none-any.whl",
            "pkgA-1.9-py3-none-any.whl",
            "pkgA-1.9.tar.gz",
        ]
    );

    let wheel = &detail.files[1];
    let sha256 = wheel.sha256().unwrap();
    assert_eq!(wheel.url, url_path(&wheel.filename, sha256));
    assert_eq!(wheel.requires_python.as_deref(), Some(">=3.8"));
    assert!(wheel.core_metadata.is_some());
    assert!(wheel.upload_time.is_some());

    let ext = fx.db.project_detail("pkga", "ext/").await.unwrap();
    assert_eq!(ext.versions, vec!["1.9"]);
    assert_eq!(ext.files.len(), 1);

    let missing = fx.db.project_detail("nothing", "").await.unwrap();
    assert!(missing.files.is_empty());
    assert!(missing.versions.is_empty());
}

#[tokio::test]
async fn test_sub_index_prefix_matches_whole_segments() {
    let fx = Fixture::new();
    write_wheel(&fx.root.join("ext"), "pkgA", "1.0");
    write_wheel(&fx.root.join("ext/deep"), "pkgB", "1.0");
    write_wheel(&fx.root.join("extra"), "pkgC", "1.0");
    fx.sync().await;

    assert_eq!(fx.projects("ext").await, vec!["pkga", "pkgb"]);
    assert_eq!(fx.projects("ext/deep/").await, vec!["pkgb"]);
    assert_eq!(fx.projects("extra").await, vec!["pkgc"]);
    assert_eq!(fx.projects("e").await, Vec::<String>::new());
    assert_eq!(fx.projects("").await, vec!["pkga", "pkgb", "pkgc"]);

    let per_sub_index = fx.db.stats_per_sub_index().await.unwrap();
    let names: Vec<_> = per_sub_index.iter().map(|s| s.sub_index.as_str()).collect();
    assert_eq!(names, vec!["ext/", "ext/deep/", "extra/"]);
}

#[tokio::test]
async fn test_metadata_lookup() {
    let fx = Fixture::new();
    write_wheel(&fx.root.join("ext"), "pkgA", "1.0");
    fx.sync().await;

    let filename = "pkgA-1.0-py3-none-any.whl";
    let metadata = fx.db.metadata(&fx.store, filename, "").await.unwrap();
    assert_eq!(metadata.unwrap(), metadata_for("pkgA", "1.0").into_bytes());

    assert!(fx
        .db
        .metadata(&fx.store, filename, "ext")
        .await
        .unwrap()
        .is_some());
    assert!(fx
        .db
        .metadata(&fx.store, filename, "other")
        .await
        .unwrap()
        .is_none());
    assert!(fx
        .db
        .metadata(&fx.store, "nope-1.0.tar.gz", "")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_last_modified_advances_on_update() {
    let fx = Fixture::new();
    filetime::set_file_mtime(fx.db.path(), FileTime::from_unix_time(1_000_000, 0)).unwrap();
    let before = fx.db.last_modified().unwrap();

    fx.sync().await;
    assert!(fx.db.last_modified().unwrap() > before);
}

#[tokio::test]
async fn test_read_only_handle() {
    let fx = Fixture::new();
    write_wheel(&fx.root, "pkgA", "1.0");
    fx.sync().await;

    let reader = Database::open(fx.db.path(), DatabaseOptions::default()).unwrap();
    assert_eq!(reader.stats().await.unwrap(), stats(1, 1, 1));

    let err = reader
        .update(&fx.scanner, &fx.reader, &fx.store)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::ReadOnly));
}

#[tokio::test]
async fn test_closed_database_refuses_queries() {
    let fx = Fixture::new();
    fx.db.close();
    assert!(matches!(fx.db.stats().await, Err(IndexerError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries() {
    let fx = Fixture::new();
    write_wheel(&fx.root, "pkgA", "1.0");
    write_wheel(&fx.root, "pkgB", "1.0");
    fx.sync().await;

    let reader = Database::open(
        fx.db.path(),
        DatabaseOptions {
            read_only: true,
            max_connections: 2,
            max_concurrency: 2,
        },
    )
    .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let reader = reader.clone();
            tokio::spawn(async move { reader.list_projects("").await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().projects.len(), 2);
    }
}

#[test]
fn test_sub_index_prefix() {
    assert_eq!(sub_index_prefix(""), "");
    assert_eq!(sub_index_prefix("/"), "");
    assert_eq!(sub_index_prefix("ext"), "ext/");
    assert_eq!(sub_index_prefix("ext/"), "ext/");
    assert_eq!(sub_index_prefix("ext/deep"), "ext/deep/");
}

#[test]
fn test_touch_failure_is_only_logged() {
    let temp_dir = tempdir().unwrap();
    let logs = LogBuffer::default();
    {
        let _guard = logs.install();
        touch(&temp_dir.path().join("missing/index.sqlite"));
    }
    let output = logs.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("Failed to bump database mtime"));

    let db = temp_dir.path().join("index.sqlite");
    std::fs::write(&db, b"").unwrap();
    let old = FileTime::from_unix_time(1_000_000, 0);
    filetime::set_file_mtime(&db, old).unwrap();
    touch(&db);
    let modified = FileTime::from_last_modification_time(&std::fs::metadata(&db).unwrap());
    assert!(modified > old);
}
