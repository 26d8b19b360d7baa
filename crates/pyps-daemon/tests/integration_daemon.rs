//! Integration tests for the index context the daemon runs on.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use pyps_core::{CoreError, IndexContext, ServerConfig};

/// Helper to create a test config
fn test_config(base_dir: &Path) -> ServerConfig {
    ServerConfig {
        socket_path: base_dir.join("test.sock"),
        pid_file: base_dir.join("test.pid"),
        watch: false,
        log_level: "debug".to_string(),
        ..ServerConfig::for_base_dir(base_dir)
    }
}

fn write_wheel(dir: &Path, name: &str, version: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file(
        format!("{name}-{version}.dist-info/METADATA"),
        zip::write::FileOptions::default(),
    )
    .unwrap();
    write!(zip, "Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n\n").unwrap();
    zip.finish().unwrap();
    path
}

/// An index survives a restart of the process
#[tokio::test]
async fn test_index_reload_from_disk() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().canonicalize().unwrap();
    write_wheel(&base, "pkga", "1.0");

    {
        let context = IndexContext::open(test_config(&base)).unwrap();
        assert_eq!(context.sync().await.unwrap().added, 1);
        context.shutdown().await;
    }

    {
        let context = IndexContext::open(test_config(&base)).unwrap();
        let list = context.list_projects("").await.unwrap();
        assert_eq!(list.names(), vec!["pkga"]);

        let report = context.sync().await.unwrap();
        assert!(!report.changed());
    }
}

/// Removing the canonical copy of a duplicated file relinks the store
#[tokio::test]
async fn test_relink_through_context() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().canonicalize().unwrap();
    let root_copy = write_wheel(&base, "pkga", "1.0");
    write_wheel(&base.join("mirror"), "pkga", "1.0");

    let context = IndexContext::open(test_config(&base)).unwrap();
    context.sync().await.unwrap();
    assert_eq!(context.stats().await.unwrap().distributions, 2);

    std::fs::remove_file(&root_copy).unwrap();
    let report = context.sync().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.relinked, 1);

    let metadata = context
        .metadata("pkga-1.0-py3-none-any.whl", "mirror")
        .await
        .unwrap();
    assert!(String::from_utf8(metadata).unwrap().contains("Name: pkga"));

    assert!(matches!(
        context.list_projects("").await,
        Ok(list) if list.names() == vec!["pkga"]
    ));
}

/// A cache directory outside the tree is honoured
#[tokio::test]
async fn test_external_cache_dir() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("tree");
    let cache = temp_dir.path().join("state");
    std::fs::create_dir_all(&base).unwrap();
    write_wheel(&base, "pkga", "1.0");

    let mut config = test_config(&base);
    config.cache_dir = Some(cache.clone());

    let context = IndexContext::open(config).unwrap();
    context.sync().await.unwrap();

    assert!(cache.join("index.sqlite").exists());
    assert!(cache.join("files").is_dir());
    assert!(!base.join(".cache").exists());
}

/// Concurrent readers while a reconciliation runs
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_during_sync() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().canonicalize().unwrap();
    for i in 0..20 {
        write_wheel(&base.join(format!("team{}", i % 4)), &format!("pkg{i}"), "1.0");
    }

    let context = Arc::new(IndexContext::open(test_config(&base)).unwrap());
    context.sync().await.unwrap();

    write_wheel(&base, "late", "2.0");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ctx = context.clone();
        handles.push(tokio::spawn(async move { ctx.stats().await }));
    }
    let sync = {
        let ctx = context.clone();
        tokio::spawn(async move { ctx.sync().await })
    };

    for handle in handles {
        let stats = handle.await.unwrap().unwrap();
        assert!(stats.distributions == 20 || stats.distributions == 21);
    }
    assert_eq!(sync.await.unwrap().unwrap().added, 1);
    assert_eq!(context.stats().await.unwrap().distributions, 21);
}

/// Overlapping sync calls serialize and the second finds nothing to do
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_syncs() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().canonicalize().unwrap();
    write_wheel(&base, "pkga", "1.0");

    let context = Arc::new(IndexContext::open(test_config(&base)).unwrap());
    let first = {
        let ctx = context.clone();
        tokio::spawn(async move { ctx.sync().await })
    };
    let second = {
        let ctx = context.clone();
        tokio::spawn(async move { ctx.sync().await })
    };

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    assert_eq!(a.added + b.added, 1);
}

/// Queries after shutdown fail instead of hanging
#[tokio::test]
async fn test_queries_after_shutdown() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().canonicalize().unwrap();

    let context = IndexContext::open(test_config(&base)).unwrap();
    context.shutdown().await;

    assert!(matches!(
        context.stats().await,
        Err(CoreError::Indexer(_))
    ));
}
