//! In-memory [`RowStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::CanonicalRow;

use super::RowStore;

/// Rows per dataset in insertion order.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    datasets: RwLock<HashMap<Uuid, Vec<CanonicalRow>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of datasets with at least one stored row.
    pub async fn dataset_count(&self) -> usize {
        self.datasets
            .read()
            .await
            .values()
            .filter(|rows| !rows.is_empty())
            .count()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn bulk_insert(&self, dataset_id: Uuid, rows: &[CanonicalRow]) -> StoreResult<()> {
        self.datasets
            .write()
            .await
            .entry(dataset_id)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn read_page(
        &self,
        dataset_id: Uuid,
        skip: usize,
        take: usize,
    ) -> StoreResult<Vec<CanonicalRow>> {
        let datasets = self.datasets.read().await;
        Ok(datasets
            .get(&dataset_id)
            .map(|rows| rows.iter().skip(skip).take(take).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, dataset_id: Uuid) -> StoreResult<u64> {
        let datasets = self.datasets.read().await;
        Ok(datasets.get(&dataset_id).map_or(0, |rows| rows.len() as u64))
    }

    async fn delete(&self, dataset_id: Uuid) -> StoreResult<u64> {
        let removed = self.datasets.write().await.remove(&dataset_id);
        Ok(removed.map_or(0, |rows| rows.len() as u64))
    }
}
