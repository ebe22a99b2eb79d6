//! Storage collaborators used by the ingestion pipeline.
//!
//! - [`BlobStore`] keeps original upload bytes by path. [`BoundedArtifactStore`] is the
//!   in-memory implementation; [`FaultInjectingStore`] wraps any implementation with
//!   configurable failures.
//! - [`RowStore`] keeps canonical rows per dataset for datasets too large to keep inline.
//!   [`MemoryRowStore`] is the in-memory implementation.

pub mod fault;
pub mod memory;
pub mod rows;

pub use fault::FaultInjectingStore;
pub use memory::{BoundedArtifactStore, EvictionHandle, StoreStats};
pub use rows::MemoryRowStore;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::CanonicalRow;

/// Path-addressed storage for raw upload bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any previous value. Returns the path written.
    async fn save(&self, path: &str, bytes: Bytes) -> StoreResult<String>;

    /// Read the bytes stored at `path`.
    async fn read(&self, path: &str) -> StoreResult<Bytes>;

    /// Remove `path`. Returns whether something was removed; deleting a missing path is not an
    /// error.
    async fn delete(&self, path: &str) -> StoreResult<bool>;
}

/// Per-dataset storage for canonical rows.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Append `rows` to the dataset.
    async fn bulk_insert(&self, dataset_id: Uuid, rows: &[CanonicalRow]) -> StoreResult<()>;

    /// Read up to `take` rows after skipping `skip`, in insertion order.
    async fn read_page(
        &self,
        dataset_id: Uuid,
        skip: usize,
        take: usize,
    ) -> StoreResult<Vec<CanonicalRow>>;

    /// Number of rows stored for the dataset (0 if unknown).
    async fn count(&self, dataset_id: Uuid) -> StoreResult<u64>;

    /// Remove every row of the dataset. Returns how many were removed.
    async fn delete(&self, dataset_id: Uuid) -> StoreResult<u64>;
}
