use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tabular_ingest::StoreError;
use tabular_ingest::config::{ConfigError, StoreConfig};
use tabular_ingest::store::{BlobStore, BoundedArtifactStore};

fn config(max_entries: usize) -> StoreConfig {
    StoreConfig {
        max_entries,
        max_item_bytes: 1024,
        retention_secs: 3600,
        eviction_interval_secs: 60,
        ..Default::default()
    }
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let store = BoundedArtifactStore::new(config(10));
    let payload = Bytes::from_static(b"id,name\n1,Ada\n");
    store.put("datasets/a/people.csv", payload.clone()).await.unwrap();
    assert_eq!(store.get("datasets/a/people.csv").await.unwrap(), payload);

    let stats = store.stats();
    assert_eq!(stats.count, 1);
    assert_eq!(stats.total_bytes, payload.len() as u64);
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let store = BoundedArtifactStore::new(config(10));
    assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = BoundedArtifactStore::new(config(10));
    store.put("k", Bytes::from_static(b"v")).await.unwrap();
    assert!(store.delete("k").await.unwrap());
    assert!(!store.delete("k").await.unwrap());
    assert_eq!(store.stats().total_bytes, 0);
}

#[tokio::test]
async fn blob_store_interface_delegates() {
    let store = BoundedArtifactStore::new(config(10));
    let blobs: Arc<dyn BlobStore> = Arc::new(store.clone());
    let path = blobs.save("p", Bytes::from_static(b"abc")).await.unwrap();
    assert_eq!(path, "p");
    assert_eq!(blobs.read("p").await.unwrap(), Bytes::from_static(b"abc"));
    assert!(store.contains("p"));
    assert!(blobs.delete("p").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn eviction_enforces_ceiling_least_recently_accessed_first() {
    let store = BoundedArtifactStore::new(config(2));
    store.put("a", Bytes::from_static(b"1")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    store.put("b", Bytes::from_static(b"2")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    store.put("c", Bytes::from_static(b"3")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    // `a` is the oldest entry but the most recently read.
    store.get("a").await.unwrap();

    // Writes never evict synchronously.
    assert_eq!(store.stats().count, 3);

    assert_eq!(store.evict_now(), 1);
    assert!(store.contains("a"));
    assert!(!store.contains("b"));
    assert!(store.contains("c"));

    let stats = store.stats();
    assert!(stats.count <= stats.max_entries);
    assert_eq!(stats.evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn untouched_entries_go_oldest_created_first() {
    let store = BoundedArtifactStore::new(config(1));
    for key in ["first", "second", "third"] {
        store.put(key, Bytes::from_static(b"x")).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    assert_eq!(store.evict_now(), 2);
    assert_eq!(store.keys(), vec!["third".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn retention_expires_idle_entries() {
    let store = BoundedArtifactStore::new(StoreConfig {
        retention_secs: 60,
        ..config(10)
    });
    store.put("idle", Bytes::from_static(b"1")).await.unwrap();
    store.put("busy", Bytes::from_static(b"2")).await.unwrap();

    tokio::time::advance(Duration::from_secs(45)).await;
    store.get("busy").await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(store.evict_now(), 1);
    assert!(!store.contains("idle"));
    assert!(store.contains("busy"));
}

#[tokio::test(start_paused = true)]
async fn background_task_evicts_on_interval_and_shuts_down() {
    let store = BoundedArtifactStore::new(StoreConfig {
        retention_secs: 5,
        eviction_interval_secs: 10,
        ..config(10)
    });
    let handle = store.spawn_eviction();
    store.put("k", Bytes::from_static(b"v")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!store.contains("k"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn background_task_reacts_to_capacity_pressure() {
    let store = BoundedArtifactStore::new(StoreConfig {
        eviction_interval_secs: 3600,
        ..config(2)
    });
    let handle = store.spawn_eviction();
    for key in ["a", "b", "c", "d"] {
        store.put(key, Bytes::from_static(b"x")).await.unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    // Let the task observe the notification well before the next tick.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.stats().count <= 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn oversized_item_is_a_capacity_error() {
    let store = BoundedArtifactStore::new(config(10));
    let err = store.put("big", Bytes::from(vec![0u8; 2048])).await.unwrap_err();
    assert!(matches!(err, StoreError::Capacity { size: 2048, limit: 1024, .. }));
}

#[tokio::test]
async fn update_limits_applies_new_ceiling() {
    let store = BoundedArtifactStore::new(config(10));
    for i in 0..5 {
        store.put(&format!("k{i}"), Bytes::from_static(b"x")).await.unwrap();
    }
    store.update_limits(config(3)).unwrap();
    store.evict_now();
    assert_eq!(store.stats().count, 3);
    let err = store.update_limits(config(0)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("max_entries")), "{err:?}");
}

#[tokio::test]
async fn concurrent_operations_are_safe() {
    let store = BoundedArtifactStore::new(StoreConfig {
        max_concurrent_operations: 4,
        ..config(1_000)
    });
    let mut tasks = Vec::new();
    for i in 0..64 {
        let s = store.clone();
        tasks.push(tokio::spawn(async move {
            let key = format!("k{i}");
            s.put(&key, Bytes::from(format!("v{i}"))).await.unwrap();
            let got = s.get(&key).await.unwrap();
            assert_eq!(got, Bytes::from(format!("v{i}")));
            if i % 2 == 0 {
                s.delete(&key).await.unwrap();
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(store.stats().count, 32);
}

#[tokio::test]
async fn closed_store_rejects_operations() {
    let store = BoundedArtifactStore::new(config(10));
    store.put("k", Bytes::from_static(b"v")).await.unwrap();
    store.close();
    assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
    assert!(matches!(store.delete("k").await, Err(StoreError::Closed)));
    assert_eq!(store.keys(), vec!["k".to_string()]);
}
