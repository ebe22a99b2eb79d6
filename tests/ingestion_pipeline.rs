use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tabular_ingest::catalog::MemoryCatalog;
use tabular_ingest::StoreError;
use tabular_ingest::config::{
    FaultInjectionConfig, IngestConfig, StoreConfig, TieringConfig, TimeoutConfig,
};
use tabular_ingest::hashing::content_hash;
use tabular_ingest::ingestion::ParseOptions;
use tabular_ingest::store::{BlobStore, BoundedArtifactStore, MemoryRowStore, RowStore};
use tabular_ingest::types::{ProcessingStatus, RawUpload, StorageTier};
use tabular_ingest::{IngestOptions, IngestionError, Ingestor, StoreResult};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    ingestor: Ingestor,
    store: BoundedArtifactStore,
    rows: Arc<MemoryRowStore>,
    catalog: Arc<MemoryCatalog>,
}

fn harness(config: IngestConfig) -> Harness {
    let store = BoundedArtifactStore::new(config.store.clone());
    harness_with_blobs(config, store.clone(), Arc::new(store))
}

fn harness_with_blobs(
    config: IngestConfig,
    store: BoundedArtifactStore,
    blobs: Arc<dyn BlobStore>,
) -> Harness {
    let rows = Arc::new(MemoryRowStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let ingestor = Ingestor::new(config, blobs, rows.clone(), catalog.clone());
    Harness {
        ingestor,
        store,
        rows,
        catalog,
    }
}

fn people_upload() -> RawUpload {
    let bytes = std::fs::read("tests/fixtures/people.csv").unwrap();
    RawUpload::new(bytes, "people.csv", "text/csv")
}

fn numbers_csv(rows: usize) -> Vec<u8> {
    let mut out = String::from("n,square\n");
    for i in 0..rows {
        out.push_str(&format!("{i},{}\n", i * i));
    }
    out.into_bytes()
}

/// Saves through to a real store, then stalls before returning.
struct StallingStore {
    inner: BoundedArtifactStore,
    stall: Duration,
}

#[async_trait]
impl BlobStore for StallingStore {
    async fn save(&self, path: &str, bytes: Bytes) -> StoreResult<String> {
        self.inner.save(path, bytes).await?;
        tokio::time::sleep(self.stall).await;
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> StoreResult<Bytes> {
        self.inner.read(path).await
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        BlobStore::delete(&self.inner, path).await
    }
}

#[tokio::test]
async fn three_row_csv_is_stored_inline() {
    let h = harness(IngestConfig::default());
    let upload = people_upload();
    let expected_hash = content_hash(&upload.bytes);

    let meta = h
        .ingestor
        .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(meta.status, ProcessingStatus::Completed);
    assert_eq!(meta.name, "people");
    assert_eq!(meta.storage_tier, Some(StorageTier::Inline));
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.column_count, 3);
    assert_eq!(meta.content_hash.as_deref(), Some(expected_hash.as_str()));
    assert!(meta.processing_error.is_none());
    assert!(!meta.row_limit_applied);

    let path = meta.blob_path.clone().unwrap();
    assert!(h.store.contains(&path));
    assert_eq!(h.rows.count(meta.id).await.unwrap(), 0);

    let schema = h.ingestor.get_schema(meta.id).await.unwrap();
    assert_eq!(schema.columns, vec!["id", "name", "value"]);

    let preview = h.ingestor.get_preview(meta.id).await.unwrap();
    assert_eq!(preview.len(), 3);
    assert_eq!(
        preview[2].values().collect::<Vec<_>>(),
        vec!["3", "Carol", "30"]
    );

    let page = h.ingestor.get_rows(meta.id, 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("name"), Some("Bob"));
}

#[tokio::test]
async fn large_dataset_goes_to_row_store_with_preview() {
    let h = harness(IngestConfig {
        tiering: TieringConfig {
            max_rows_for_inline: 2,
            preview_rows: 2,
            ..Default::default()
        },
        ..Default::default()
    });
    let upload = RawUpload::new(numbers_csv(5), "numbers.csv", "text/csv");

    let meta = h
        .ingestor
        .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(meta.status, ProcessingStatus::Completed);
    assert_eq!(meta.storage_tier, Some(StorageTier::RowStore));
    assert_eq!(meta.row_count, 5);
    assert_eq!(meta.preview_rows.len(), 2);
    assert_eq!(h.rows.count(meta.id).await.unwrap(), 5);

    let tail = h.ingestor.get_rows(meta.id, 3, 10).await.unwrap();
    let squares: Vec<_> = tail.iter().filter_map(|r| r.get("square")).collect();
    assert_eq!(squares, vec!["9", "16"]);
}

#[tokio::test]
async fn parse_failure_is_recorded_as_failed_dataset() {
    let h = harness(IngestConfig::default());
    let upload = RawUpload::new(&b"a,b\n1,\"never closed\n"[..], "broken.csv", "text/csv");

    let meta = h
        .ingestor
        .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(meta.status, ProcessingStatus::Failed);
    assert!(
        meta.processing_error
            .as_deref()
            .is_some_and(|e| e.contains("unterminated quoted field")),
        "{:?}",
        meta.processing_error
    );
    assert_eq!(meta.storage_tier, None);
    assert_eq!(meta.row_count, 0);
    assert!(meta.content_hash.is_some());
    assert_eq!(h.store.stats().count, 0);

    // Failed datasets are visible but expose no rows.
    assert!(h.ingestor.get_preview(meta.id).await.unwrap().is_empty());
    assert!(h.ingestor.get_schema(meta.id).await.unwrap().is_empty());
    assert!(h.ingestor.get_rows(meta.id, 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn input_without_columns_is_a_failure_not_an_empty_success() {
    let h = harness(IngestConfig::default());
    let upload = RawUpload::new(&b"[]"[..], "empty.json", "application/json");
    let meta = h
        .ingestor
        .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(meta.status, ProcessingStatus::Failed);
    assert!(meta.processing_error.unwrap().contains("no columns"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_mid_parse_leaves_nothing_completed() {
    let h = harness(IngestConfig::default());
    let upload = RawUpload::new(numbers_csv(400_000), "big.csv", "text/csv");
    let cancel = CancellationToken::new();

    let ingestor = h.ingestor.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        ingestor
            .ingest(upload, &IngestOptions::default(), &token)
            .await
    });
    tokio::task::yield_now().await;
    cancel.cancel();

    let meta = task.await.unwrap().unwrap();
    assert_eq!(meta.status, ProcessingStatus::Failed);
    assert_eq!(meta.processing_error.as_deref(), Some("ingestion cancelled"));
    assert_eq!(h.store.stats().count, 0);
    assert_eq!(h.rows.dataset_count().await, 0);
    assert!(h.catalog.list().await.iter().all(|m| !m.is_completed()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_during_persist_rolls_back_the_blob() {
    let store = BoundedArtifactStore::new(Default::default());
    let blobs = Arc::new(StallingStore {
        inner: store.clone(),
        stall: Duration::from_secs(60),
    });
    let h = harness_with_blobs(IngestConfig::default(), store, blobs);
    let cancel = CancellationToken::new();

    let ingestor = h.ingestor.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        ingestor
            .ingest(people_upload(), &IngestOptions::default(), &token)
            .await
    });

    while h.store.stats().count == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    let meta = task.await.unwrap().unwrap();
    assert_eq!(meta.status, ProcessingStatus::Failed);
    assert_eq!(h.store.stats().count, 0, "blob left behind: {:?}", h.store.keys());
}

#[tokio::test]
async fn persist_timeout_fails_the_dataset() {
    let store = BoundedArtifactStore::new(Default::default());
    let blobs = Arc::new(StallingStore {
        inner: store.clone(),
        stall: Duration::from_secs(60),
    });
    let config = IngestConfig {
        timeouts: TimeoutConfig {
            long_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = harness_with_blobs(config, store, blobs);

    let meta = h
        .ingestor
        .ingest(people_upload(), &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(meta.status, ProcessingStatus::Failed);
    let error = meta.processing_error.unwrap();
    assert!(error.contains("persisting timed out"), "{error}");
    assert_eq!(h.store.stats().count, 0);
}

#[tokio::test]
async fn injected_store_full_fault_is_recorded() {
    let ingestor = Ingestor::in_memory(IngestConfig {
        faults: FaultInjectionConfig {
            store_full_probability: 1.0,
            corruption_probability: 0.0,
            seed: Some(1),
        },
        ..Default::default()
    });

    let meta = ingestor
        .ingest(people_upload(), &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(meta.status, ProcessingStatus::Failed);
    assert!(meta.processing_error.unwrap().contains("capacity exceeded"));
}

#[tokio::test]
async fn in_memory_ingestor_evicts_from_its_own_store() {
    let ingestor = Ingestor::in_memory(IngestConfig {
        store: StoreConfig {
            max_entries: 2,
            retention_secs: 1,
            eviction_interval_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    for i in 0..5 {
        let upload = RawUpload::new(format!("id\n{i}\n").into_bytes(), format!("ids_{i}.csv"), "text/csv");
        let meta = ingestor
            .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(meta.status, ProcessingStatus::Completed);
    }

    tokio::time::pause();
    tokio::time::sleep(Duration::from_secs(120)).await;

    let store = ingestor.artifact_store().unwrap();
    let stats = store.stats();
    assert_eq!(stats.count, 0, "idle entries outlived retention");
    assert!(stats.evictions >= 5);

    ingestor.shutdown().await;
    ingestor.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_owned_store() {
    let ingestor = Ingestor::in_memory(IngestConfig::default());
    ingestor
        .ingest(people_upload(), &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    ingestor.shutdown().await;

    let store = ingestor.artifact_store().unwrap();
    assert!(matches!(store.get("anything").await, Err(StoreError::Closed)));

    let meta = ingestor
        .ingest(people_upload(), &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(meta.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn injected_stores_are_not_owned() {
    let h = harness(IngestConfig::default());
    assert!(h.ingestor.artifact_store().is_none());
    h.ingestor.shutdown().await;
    h.store.put("k", Bytes::from_static(b"v")).await.unwrap();
}

#[tokio::test]
async fn deduplicate_returns_existing_dataset() {
    let h = harness(IngestConfig::default());
    let dedup = IngestOptions {
        deduplicate: true,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let first = h.ingestor.ingest(people_upload(), &dedup, &cancel).await.unwrap();
    let renamed = RawUpload::new(people_upload().bytes, "copy.csv", "text/csv");
    let second = h.ingestor.ingest(renamed, &dedup, &cancel).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.catalog.len().await, 1);

    let third = h
        .ingestor
        .ingest(people_upload(), &IngestOptions::default(), &cancel)
        .await
        .unwrap();
    assert_ne!(first.id, third.id);
    assert_eq!(first.content_hash, third.content_hash);
}

#[tokio::test]
async fn row_cap_is_reported_in_metadata() {
    let h = harness(IngestConfig::default());
    let options = IngestOptions {
        parse: Some(ParseOptions {
            max_rows: 2,
            ..Default::default()
        }),
        ..Default::default()
    };
    let meta = h
        .ingestor
        .ingest(people_upload(), &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(meta.row_count, 2);
    assert!(meta.row_limit_applied);
}

#[tokio::test]
async fn invalid_caller_parse_options_fail_the_dataset() {
    let h = harness(IngestConfig::default());
    for (parse, expected) in [
        (
            ParseOptions {
                delimiter: '§',
                ..Default::default()
            },
            "delimiter",
        ),
        (
            ParseOptions {
                max_rows: 0,
                ..Default::default()
            },
            "max_rows",
        ),
    ] {
        let options = IngestOptions {
            parse: Some(parse),
            ..Default::default()
        };
        let meta = h
            .ingestor
            .ingest(people_upload(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(meta.status, ProcessingStatus::Failed);
        let error = meta.processing_error.unwrap();
        assert!(error.contains("invalid parse options"), "{error}");
        assert!(error.contains(expected), "{error}");
    }
    assert_eq!(h.store.stats().count, 0);
}

#[tokio::test]
async fn soft_delete_hides_and_restore_reveals() {
    let h = harness(IngestConfig::default());
    let meta = h
        .ingestor
        .ingest(people_upload(), &IngestOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.ingestor.soft_delete(meta.id).await.unwrap());
    assert!(!h.ingestor.soft_delete(meta.id).await.unwrap());
    assert!(matches!(
        h.ingestor.get_preview(meta.id).await,
        Err(IngestionError::DatasetNotFound(id)) if id == meta.id
    ));

    assert!(h.ingestor.restore(meta.id).await.unwrap());
    assert_eq!(h.ingestor.get_schema(meta.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_dataset_is_not_found() {
    let h = harness(IngestConfig::default());
    let id = Uuid::new_v4();
    assert!(matches!(
        h.ingestor.get_schema(id).await,
        Err(IngestionError::DatasetNotFound(_))
    ));
    assert!(matches!(
        h.ingestor.restore(id).await,
        Err(IngestionError::DatasetNotFound(_))
    ));
}

#[tokio::test]
async fn every_format_ingests_through_the_same_pipeline() {
    let h = harness(IngestConfig::default());
    let cancel = CancellationToken::new();
    for (file, content_type, rows) in [
        ("heterogeneous.json", "application/json", 2),
        ("catalog.xml", "application/xml", 3),
        ("notes.txt", "text/plain", 4),
    ] {
        let bytes = std::fs::read(format!("tests/fixtures/{file}")).unwrap();
        let meta = h
            .ingestor
            .ingest(
                RawUpload::new(bytes, file, content_type),
                &IngestOptions::default(),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(meta.status, ProcessingStatus::Completed, "{file}");
        assert_eq!(meta.row_count, rows, "{file}");
    }
}
