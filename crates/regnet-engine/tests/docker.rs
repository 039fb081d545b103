//! Integration tests for regnet-engine against a live Docker daemon.
//!
//! These tests require:
//! - A reachable Docker daemon
//! - The `busybox:latest` image pulled locally
//!
//! Run with: `cargo test -p regnet-engine -- --ignored`

use bytes::Bytes;
use regnet_engine::{
    bundle, DockerEngine, EngineError, LifecycleManager, NameFilter, SandboxEngine, SandboxSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const IMAGE: &str = "busybox:latest";

fn spec(name: &str) -> SandboxSpec {
    let mut spec = SandboxSpec::new(IMAGE, name);
    spec.labels.insert("io.regnet.test".into(), "true".into());
    spec
}

/// Create `name`, removing any leftover from an earlier run first.
async fn fresh(manager: &LifecycleManager, name: &str) -> String {
    let engine = manager.engine();
    let _ = engine.remove(name, true).await;
    manager
        .create_and_start(&spec(name))
        .await
        .expect("Failed to create sandbox")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_ping() {
    let engine = DockerEngine::connect().expect("Failed to connect");
    engine.ping().await.expect("Docker daemon not reachable");
}

#[tokio::test]
#[ignore = "requires Docker + busybox image"]
async fn test_lifecycle_roundtrip() {
    let manager = LifecycleManager::new(Arc::new(DockerEngine::connect().unwrap()))
        .with_stop_grace(Duration::from_secs(1));
    let name = "regnet-it-lifecycle-a";

    let id = fresh(&manager, name).await;
    let duplicate = manager.create_and_start(&spec(name)).await;
    assert!(matches!(duplicate, Err(EngineError::AlreadyExists(_))));

    manager.stop_and_remove(&id).await.expect("stop_and_remove");
    manager.stop_and_remove(&id).await.expect("idempotent stop_and_remove");
}

#[tokio::test]
#[ignore = "requires Docker + busybox image"]
async fn test_copy_archive_and_bulk_stop() {
    let manager = LifecycleManager::new(Arc::new(DockerEngine::connect().unwrap()))
        .with_stop_grace(Duration::from_secs(1));

    let id = fresh(&manager, "regnet-it-bulk-a").await;
    fresh(&manager, "regnet-it-bulk-b").await;

    let mut files = BTreeMap::new();
    files.insert("hello.txt", "hello");
    let archive: Bytes = bundle(&files).unwrap();
    manager
        .copy_archive(&id, "/tmp", archive)
        .await
        .expect("copy_archive");

    let filter = NameFilter::prefixed("regnet-it-bulk-", "").unwrap();
    let report = manager
        .stop_all_matching(&filter, false, Duration::from_secs(60))
        .await
        .expect("stop_all_matching");
    assert_eq!(report.succeeded.len(), 2);
    assert!(manager.find(&filter).await.unwrap().is_empty());
}
