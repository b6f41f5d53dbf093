//! Upload cache resolution against a fake file store.

mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{registry_fixture, FakeFileStore};
use context_triage::cache::UploadCache;
use context_triage::error::TriageError;
use context_triage::registry::LazyRegistry;
use tempfile::TempDir;

const PUMP: &str = "user_sources/pump_manual";

fn cache(registry: &Arc<LazyRegistry>, store: &Arc<FakeFileStore>, tmp: &TempDir) -> UploadCache {
    UploadCache::new(Arc::clone(registry), store.clone(), tmp.path().join("uploads"))
        .with_polling(Duration::from_millis(5), 10)
}

fn pump_path(registry: &LazyRegistry) -> std::path::PathBuf {
    registry.get(PUMP).unwrap().location.clone()
}

#[tokio::test]
async fn identical_content_reuses_the_handle() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();

    let uploads = cache(&registry, &store, &tmp);
    let first = uploads.get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(store.upload_count(), 1);

    // Same cache: memory tier, no liveness check.
    let again = uploads.get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);

    // Fresh cache over the same directory: persisted tier plus liveness check.
    let gets_before = store.gets.load(Ordering::SeqCst);
    let restarted = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(restarted.id, first.id);
    assert_eq!(store.upload_count(), 1);
    assert!(store.gets.load(Ordering::SeqCst) > gets_before);
}

#[tokio::test]
async fn touching_without_changing_content_does_not_reupload() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();
    let path = pump_path(&registry);

    let first = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    let content = fs::read(&path).unwrap();
    fs::write(&path, &content).unwrap();

    let second = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(store.upload_count(), 1);
}

#[tokio::test]
async fn single_byte_change_forces_reupload() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();
    let uploads = cache(&registry, &store, &tmp);
    let path = pump_path(&registry);

    let first = uploads.get_or_create_handle(PUMP).await.unwrap();

    let mut content = fs::read(&path).unwrap();
    content.push(b'!');
    fs::write(&path, &content).unwrap();

    let second = uploads.get_or_create_handle(PUMP).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(store.upload_count(), 2);

    let record = uploads.read_record(PUMP).unwrap();
    assert_eq!(record.handle_id, second.id);
    assert_eq!(record.display_name, "Pump Manual");
}

#[tokio::test]
async fn corrupt_record_is_a_miss() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();

    cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    let record_path = tmp.path().join("uploads").join("user_sources__pump_manual.json");
    assert!(record_path.exists());
    fs::write(&record_path, "{ not json").unwrap();

    let uploads = cache(&registry, &store, &tmp);
    assert!(uploads.read_record(PUMP).is_none());
    uploads.get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(store.upload_count(), 2);
    assert!(uploads.read_record(PUMP).is_some());
}

#[tokio::test]
async fn expired_handle_is_replaced() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();

    let first = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    store.expire(&first.id);

    let second = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(store.upload_count(), 2);
}

#[tokio::test]
async fn waits_for_processing_to_finish() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::slow(3);

    let handle = cache(&registry, &store, &tmp).get_or_create_handle(PUMP).await.unwrap();
    assert!(handle.is_active());
    assert_eq!(store.gets.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_processing_is_an_error() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::failing_processing();

    let err = cache(&registry, &store, &tmp)
        .get_or_create_handle(PUMP)
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Provider(_)));
}

#[tokio::test]
async fn invalidate_forces_reupload() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();
    let uploads = cache(&registry, &store, &tmp);

    uploads.get_or_create_handle(PUMP).await.unwrap();
    uploads.invalidate(PUMP);
    assert!(uploads.read_record(PUMP).is_none());

    uploads.get_or_create_handle(PUMP).await.unwrap();
    assert_eq!(store.upload_count(), 2);
}

#[tokio::test]
async fn error_kinds() {
    let (tmp, registry) = registry_fixture();
    let store = FakeFileStore::new();
    let uploads = cache(&registry, &store, &tmp);

    assert!(matches!(
        uploads.get_or_create_handle("user_sources/unknown").await,
        Err(TriageError::SourceNotFound(_))
    ));
    assert!(matches!(
        uploads.get_or_create_handle("knowledge_base/community_wiki").await,
        Err(TriageError::UnsupportedSource(_))
    ));

    fs::remove_file(pump_path(&registry)).unwrap();
    assert!(matches!(
        uploads.get_or_create_handle(PUMP).await,
        Err(TriageError::FileMissing { .. })
    ));
    assert_eq!(store.upload_count(), 0);
}
