//! Dataset catalog: where ingestion records metadata, schema, and inline rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{CanonicalRow, CanonicalSchema, DatasetMetadata};

/// Everything recorded for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub metadata: DatasetMetadata,
    /// Empty for datasets that failed before parsing finished.
    pub schema: CanonicalSchema,
    /// Full rows for inline datasets; `None` for row-store and failed datasets.
    pub inline_rows: Option<Vec<CanonicalRow>>,
}

#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    /// Insert or replace the record for `record.metadata.id`.
    async fn insert(&self, record: DatasetRecord) -> StoreResult<()>;

    /// Fetch a record, including soft-deleted ones.
    async fn get(&self, id: Uuid) -> StoreResult<Option<DatasetRecord>>;

    /// First live, completed dataset with the given content hash.
    async fn find_by_content_hash(&self, hash: &str) -> StoreResult<Option<DatasetMetadata>>;

    /// Mark a dataset deleted. Returns `false` if it does not exist or is already deleted.
    async fn soft_delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Clear the deleted mark. Returns `false` if it does not exist or is not deleted.
    async fn restore(&self, id: Uuid) -> StoreResult<bool>;
}

/// [`DatasetCatalog`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: RwLock<HashMap<Uuid, DatasetRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Metadata of every recorded dataset, oldest first.
    pub async fn list(&self) -> Vec<DatasetMetadata> {
        let mut all: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.metadata.clone())
            .collect();
        all.sort_by_key(|m| m.created_at);
        all
    }
}

#[async_trait]
impl DatasetCatalog for MemoryCatalog {
    async fn insert(&self, record: DatasetRecord) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.metadata.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<DatasetRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_content_hash(&self, hash: &str) -> StoreResult<Option<DatasetMetadata>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .map(|r| &r.metadata)
            .filter(|m| {
                m.is_completed() && !m.is_deleted() && m.content_hash.as_deref() == Some(hash)
            })
            .min_by_key(|m| m.created_at)
            .cloned())
    }

    async fn soft_delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(r) if !r.metadata.is_deleted() => {
                r.metadata.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore(&self, id: Uuid) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(r) if r.metadata.is_deleted() => {
                r.metadata.deleted_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
