use bytes::Bytes;
use tabular_ingest::StoreError;
use tabular_ingest::config::{FaultInjectionConfig, StoreConfig};
use tabular_ingest::store::{BlobStore, BoundedArtifactStore, FaultInjectingStore};

fn store(store_full: f64, corruption: f64) -> FaultInjectingStore<BoundedArtifactStore> {
    FaultInjectingStore::new(
        BoundedArtifactStore::new(StoreConfig::default()),
        FaultInjectionConfig {
            store_full_probability: store_full,
            corruption_probability: corruption,
            seed: Some(7),
        },
    )
}

#[tokio::test]
async fn disabled_by_default_never_fails() {
    let s = FaultInjectingStore::new(
        BoundedArtifactStore::new(StoreConfig::default()),
        FaultInjectionConfig::default(),
    );
    for i in 0..200 {
        let key = format!("k{i}");
        s.save(&key, Bytes::from_static(b"payload")).await.unwrap();
        s.read(&key).await.unwrap();
    }
    assert_eq!(s.fault_stats().store_full, 0);
    assert_eq!(s.fault_stats().corruption, 0);
}

#[tokio::test]
async fn probability_one_always_fails() {
    let s = store(1.0, 0.0);
    for i in 0..50 {
        let err = s.save(&format!("k{i}"), Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Capacity { .. }));
    }
    assert_eq!(s.inner().stats().count, 0);

    let s = store(0.0, 1.0);
    s.save("k", Bytes::from_static(b"x")).await.unwrap();
    for _ in 0..50 {
        assert!(matches!(s.read("k").await, Err(StoreError::Corruption { .. })));
    }
    assert_eq!(s.fault_stats().corruption, 50);
}

#[tokio::test]
async fn missing_key_is_not_reported_as_corruption() {
    let s = store(0.0, 1.0);
    assert!(matches!(s.read("absent").await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn reseeding_replays_the_same_faults() {
    let s = store(0.5, 0.0);
    let mut first = Vec::new();
    for i in 0..40 {
        first.push(s.save(&format!("a{i}"), Bytes::from_static(b"x")).await.is_ok());
    }

    s.set_config(FaultInjectionConfig {
        store_full_probability: 0.5,
        corruption_probability: 0.0,
        seed: Some(7),
    })
    .unwrap();
    let mut second = Vec::new();
    for i in 0..40 {
        second.push(s.save(&format!("b{i}"), Bytes::from_static(b"x")).await.is_ok());
    }
    assert_eq!(first, second);
}

#[tokio::test]
async fn faults_can_be_turned_off_at_runtime() {
    let s = store(1.0, 1.0);
    s.set_config(FaultInjectionConfig::default()).unwrap();
    s.save("k", Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(s.read("k").await.unwrap(), Bytes::from_static(b"x"));
    assert!(s.delete("k").await.unwrap());
}
