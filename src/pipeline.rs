//! Ingestion orchestrator.
//!
//! [`Ingestor::ingest`] moves one upload through
//! `Validating → Hashing → Parsing → TierDeciding → Persisting → {Completed | Failed}`.
//!
//! - Validation failures are returned as `Err` and nothing is recorded.
//! - Every later outcome is recorded in the catalog and returned as `Ok` metadata, with
//!   [`ProcessingStatus::Failed`] and a `processing_error` when something went wrong.
//! - Hashing and parsing run on the blocking pool, in parallel unless deduplication needs the
//!   hash first. Parse and persist run under the long timeout; catalog writes and reads run
//!   under the short timeout.
//! - Cancellation and timeouts stop the parser at its next batch boundary. Anything already
//!   written for the upload (blob, row-store rows) is removed before the failure is recorded.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::catalog::{DatasetCatalog, DatasetRecord, MemoryCatalog};
use crate::config::IngestConfig;
use crate::error::{IngestionError, IngestionResult, ParseError};
use crate::hashing::content_hash;
use crate::ingestion::{
    IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, ParseOptions,
    parse_upload, resolve_format,
};
use crate::store::{
    BlobStore, BoundedArtifactStore, EvictionHandle, FaultInjectingStore, MemoryRowStore, RowStore,
};
use crate::tiering::{decide_tier, preview};
use crate::types::{
    CanonicalRow, CanonicalSchema, DatasetMetadata, FileFormat, ParsedTable, ProcessingStatus,
    RawUpload, StorageTier, display_name,
};
use crate::validation::validate_upload;

/// Pipeline stage of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Validating,
    Hashing,
    Parsing,
    TierDeciding,
    Persisting,
    Completed,
    Failed,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Hashing => "hashing",
            Self::Parsing => "parsing",
            Self::TierDeciding => "tier-deciding",
            Self::Persisting => "persisting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call ingestion options.
#[derive(Clone)]
pub struct IngestOptions {
    /// Parser options; `None` uses the configured defaults.
    pub parse: Option<ParseOptions>,
    /// Return the existing dataset when a live, completed dataset has the same content hash.
    pub deduplicate: bool,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for IngestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestOptions")
            .field("parse", &self.parse)
            .field("deduplicate", &self.deduplicate)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            parse: None,
            deduplicate: false,
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// What has been produced or written so far, so a failure can be recorded and rolled back.
#[derive(Debug, Default)]
struct Progress {
    content_hash: Option<String>,
    format: Option<FileFormat>,
    blob_path: Option<String>,
    rows_written: bool,
}

/// The artifact store an [`Ingestor::in_memory`] owns, with its running eviction task.
#[derive(Clone)]
struct OwnedArtifacts {
    store: BoundedArtifactStore,
    eviction: Arc<Mutex<Option<EvictionHandle>>>,
}

/// Composes validation, hashing, parsing, tiering, and persistence over injected stores.
#[derive(Clone)]
pub struct Ingestor {
    config: Arc<IngestConfig>,
    blobs: Arc<dyn BlobStore>,
    rows: Arc<dyn RowStore>,
    catalog: Arc<dyn DatasetCatalog>,
    artifacts: Option<OwnedArtifacts>,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        config: IngestConfig,
        blobs: Arc<dyn BlobStore>,
        rows: Arc<dyn RowStore>,
        catalog: Arc<dyn DatasetCatalog>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            blobs,
            rows,
            catalog,
            artifacts: None,
        }
    }

    /// An ingestor backed entirely by in-memory stores.
    ///
    /// The artifact store is wrapped in a [`FaultInjectingStore`] when `config.faults` enables
    /// any fault. Its eviction task is started here and runs until [`Ingestor::shutdown`] or
    /// until the last clone of the ingestor is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn in_memory(config: IngestConfig) -> Self {
        let store = BoundedArtifactStore::new(config.store.clone());
        let eviction = store.spawn_eviction();
        let blobs: Arc<dyn BlobStore> = if config.faults.is_enabled() {
            Arc::new(FaultInjectingStore::new(store.clone(), config.faults.clone()))
        } else {
            Arc::new(store.clone())
        };
        let mut ingestor = Self::new(
            config,
            blobs,
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryCatalog::new()),
        );
        ingestor.artifacts = Some(OwnedArtifacts {
            store,
            eviction: Arc::new(Mutex::new(Some(eviction))),
        });
        ingestor
    }

    /// The bounded store owned by an [`Ingestor::in_memory`] ingestor, for stats and
    /// administration. `None` when the stores were injected.
    pub fn artifact_store(&self) -> Option<&BoundedArtifactStore> {
        self.artifacts.as_ref().map(|a| &a.store)
    }

    /// Drain the owned eviction task and close the owned artifact store. Injected stores are
    /// left alone. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let Some(artifacts) = self.artifacts.as_ref() else {
            return;
        };
        let handle = artifacts
            .eviction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("artifact store eviction task drained");
        }
        artifacts.store.close();
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn DatasetCatalog> {
        &self.catalog
    }

    /// Ingest one upload.
    ///
    /// Returns `Err` only for validation failures and for a catalog that cannot record the
    /// outcome; every other failure is returned as `Ok` metadata with status `Failed`.
    pub async fn ingest(
        &self,
        upload: RawUpload,
        options: &IngestOptions,
        cancel: &CancellationToken,
    ) -> IngestionResult<DatasetMetadata> {
        let id = Uuid::new_v4();
        let span = info_span!(
            "ingest",
            dataset_id = %id,
            file_name = %upload.file_name,
            bytes = upload.bytes.len()
        );
        self.ingest_inner(id, upload, options, cancel)
            .instrument(span)
            .await
    }

    async fn ingest_inner(
        &self,
        id: Uuid,
        upload: RawUpload,
        options: &IngestOptions,
        cancel: &CancellationToken,
    ) -> IngestionResult<DatasetMetadata> {
        let mut ctx = IngestionContext {
            dataset_id: id,
            file_name: upload.file_name.clone(),
            format: None,
        };

        transition(IngestionStage::Validating);
        if let Err(e) = validate_upload(&upload, &self.config.validation) {
            let err = IngestionError::from(e);
            report_failure(options, &ctx, &err);
            return Err(err);
        }

        let mut progress = Progress::default();
        let outcome = self
            .process(id, &upload, options, cancel, &mut progress)
            .await;
        ctx.format = progress.format;

        match outcome {
            Ok(Processed::Duplicate(existing)) => {
                info!(existing_id = %existing.id, "duplicate upload, returning existing dataset");
                Ok(existing)
            }
            Ok(Processed::Stored(record)) => {
                let stats = IngestionStats {
                    rows: record.metadata.row_count,
                    bytes: record.metadata.byte_size,
                    tier: record
                        .metadata
                        .storage_tier
                        .unwrap_or(StorageTier::Inline),
                };
                let metadata = record.metadata.clone();
                if let Err(e) = self.record(record).await {
                    warn!(error = %e, "failed to record completed dataset; rolling back");
                    self.rollback(id, &progress).await;
                    report_failure(options, &ctx, &e);
                    return Err(e);
                }
                transition(IngestionStage::Completed);
                if let Some(obs) = options.observer.as_ref() {
                    obs.on_success(&ctx, stats);
                }
                Ok(metadata)
            }
            Err(err) => {
                self.rollback(id, &progress).await;
                transition(IngestionStage::Failed);
                report_failure(options, &ctx, &err);

                let metadata = DatasetMetadata {
                    content_hash: progress.content_hash.clone(),
                    format: progress.format,
                    processing_error: Some(err.to_string()),
                    ..base_metadata(id, &upload, ProcessingStatus::Failed)
                };
                self.record(DatasetRecord {
                    metadata: metadata.clone(),
                    schema: CanonicalSchema::default(),
                    inline_rows: None,
                })
                .await?;
                Ok(metadata)
            }
        }
    }

    async fn process(
        &self,
        id: Uuid,
        upload: &RawUpload,
        options: &IngestOptions,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> IngestionResult<Processed> {
        let long = self.config.timeouts.long();
        let parse_options = options
            .parse
            .clone()
            .unwrap_or_else(|| self.config.parser.clone());
        parse_options
            .validate()
            .map_err(IngestionError::InvalidOptions)?;

        let format = resolve_format(&upload.file_name, &upload.content_type, &parse_options)?;
        progress.format = Some(format);
        let parse_options = ParseOptions {
            format: Some(format),
            ..parse_options
        };

        transition(IngestionStage::Hashing);
        let known_hash = if options.deduplicate {
            let bytes = upload.bytes.clone();
            let hash = guarded(IngestionStage::Hashing, long, cancel, async move {
                tokio::task::spawn_blocking(move || content_hash(&bytes))
                    .await
                    .map_err(|e| IngestionError::Internal(format!("hash task failed: {e}")))
            })
            .await?;
            progress.content_hash = Some(hash.clone());

            let existing = self
                .short(IngestionStage::Hashing, self.catalog.find_by_content_hash(&hash))
                .await?;
            if let Some(existing) = existing {
                return Ok(Processed::Duplicate(existing));
            }
            Some(hash)
        } else {
            None
        };

        transition(IngestionStage::Parsing);
        let (hash, table) = self
            .hash_and_parse(upload, parse_options, known_hash, cancel, progress)
            .await?;
        debug!(
            rows = table.row_count(),
            columns = table.column_count(),
            truncated = table.truncated,
            dropped_fields = table.dropped_fields,
            "parsed upload"
        );

        transition(IngestionStage::TierDeciding);
        let byte_size = upload.bytes.len() as u64;
        let tier = decide_tier(table.row_count() as u64, byte_size, &self.config.tiering);
        debug!(%tier, "storage tier decided");

        transition(IngestionStage::Persisting);
        let path = blob_path(id, &upload.file_name);
        let row_count = guarded(
            IngestionStage::Persisting,
            long,
            cancel,
            self.persist(id, &path, upload.bytes.clone(), tier, &table.rows, progress),
        )
        .await?;

        let preview_rows = preview(&table.rows, self.config.tiering.preview_rows);
        let metadata = DatasetMetadata {
            format: Some(format),
            row_count,
            column_count: table.column_count() as u64,
            content_hash: Some(hash),
            storage_tier: Some(tier),
            blob_path: Some(path),
            preview_rows,
            row_limit_applied: table.truncated,
            ..base_metadata(id, upload, ProcessingStatus::Completed)
        };
        let inline_rows = match tier {
            StorageTier::Inline => Some(table.rows),
            StorageTier::RowStore => None,
        };

        Ok(Processed::Stored(DatasetRecord {
            metadata,
            schema: table.schema,
            inline_rows,
        }))
    }

    /// Hash and parse on the blocking pool. The parser sees a child of `cancel` that is also
    /// cancelled when this future ends early (timeout or caller cancellation).
    async fn hash_and_parse(
        &self,
        upload: &RawUpload,
        parse_options: ParseOptions,
        known_hash: Option<String>,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> IngestionResult<(String, ParsedTable)> {
        let parser_token = cancel.child_token();
        let _stop_parser = parser_token.clone().drop_guard();

        let bytes = upload.bytes.clone();
        let file_name = upload.file_name.clone();
        let content_type = upload.content_type.clone();
        let work = tokio::task::spawn_blocking(move || {
            let parse = || {
                parse_upload(&bytes, &file_name, &content_type, &parse_options, &parser_token)
            };
            match known_hash {
                Some(hash) => (hash, parse()),
                None => rayon::join(|| content_hash(&bytes), parse),
            }
        });

        let (hash, parsed) = guarded(IngestionStage::Parsing, self.config.timeouts.long(), cancel, async {
            work.await
                .map_err(|e| IngestionError::Internal(format!("parse task failed: {e}")))
        })
        .await?;
        progress.content_hash = Some(hash.clone());

        match parsed {
            Ok((_, table)) => Ok((hash, table)),
            Err(ParseError::Cancelled) => Err(IngestionError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the original bytes and, for the row-store tier, the rows. Returns the row count as
    /// seen by the chosen store.
    async fn persist(
        &self,
        id: Uuid,
        path: &str,
        bytes: Bytes,
        tier: StorageTier,
        rows: &[CanonicalRow],
        progress: &mut Progress,
    ) -> IngestionResult<u64> {
        progress.blob_path = Some(path.to_string());
        self.blobs.save(path, bytes).await?;

        match tier {
            StorageTier::Inline => Ok(rows.len() as u64),
            StorageTier::RowStore => {
                progress.rows_written = true;
                self.rows.bulk_insert(id, rows).await?;
                let stored = self.rows.count(id).await?;
                if stored != rows.len() as u64 {
                    return Err(IngestionError::Internal(format!(
                        "row store holds {stored} rows for dataset {id}, expected {}",
                        rows.len()
                    )));
                }
                Ok(stored)
            }
        }
    }

    /// Remove whatever was written for a failed upload. Failures are logged, not returned.
    async fn rollback(&self, id: Uuid, progress: &Progress) {
        let after = self.config.timeouts.short();
        if let Some(path) = progress.blob_path.as_deref() {
            match tokio::time::timeout(after, self.blobs.delete(path)).await {
                Ok(Ok(existed)) => debug!(path, existed, "rolled back blob"),
                Ok(Err(e)) => warn!(path, error = %e, "blob rollback failed"),
                Err(_) => warn!(path, ?after, "blob rollback timed out"),
            }
        }
        if progress.rows_written {
            match tokio::time::timeout(after, self.rows.delete(id)).await {
                Ok(Ok(removed)) => debug!(removed, "rolled back rows"),
                Ok(Err(e)) => warn!(error = %e, "row rollback failed"),
                Err(_) => warn!(?after, "row rollback timed out"),
            }
        }
    }

    async fn record(&self, record: DatasetRecord) -> IngestionResult<()> {
        self.short(IngestionStage::Persisting, self.catalog.insert(record))
            .await
    }

    /// Metadata of a live dataset.
    pub async fn get_metadata(&self, id: Uuid) -> IngestionResult<DatasetMetadata> {
        Ok(self.live_record(id).await?.metadata)
    }

    /// Preview rows: the first `preview_rows` rows, whatever the storage tier.
    pub async fn get_preview(&self, id: Uuid) -> IngestionResult<Vec<CanonicalRow>> {
        Ok(self.live_record(id).await?.metadata.preview_rows)
    }

    pub async fn get_schema(&self, id: Uuid) -> IngestionResult<CanonicalSchema> {
        Ok(self.live_record(id).await?.schema)
    }

    /// A page of rows from inline storage or the row store. Failed datasets have no rows.
    pub async fn get_rows(
        &self,
        id: Uuid,
        skip: usize,
        take: usize,
    ) -> IngestionResult<Vec<CanonicalRow>> {
        let record = self.live_record(id).await?;
        if let Some(rows) = record.inline_rows {
            return Ok(rows.into_iter().skip(skip).take(take).collect());
        }
        match record.metadata.storage_tier {
            Some(StorageTier::RowStore) => {
                self.short(IngestionStage::Completed, self.rows.read_page(id, skip, take))
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Mark a dataset deleted. Returns `false` if it was already deleted.
    pub async fn soft_delete(&self, id: Uuid) -> IngestionResult<bool> {
        self.require_exists(id).await?;
        let deleted = self
            .short(IngestionStage::Completed, self.catalog.soft_delete(id))
            .await?;
        if deleted {
            info!(dataset_id = %id, "dataset soft-deleted");
        }
        Ok(deleted)
    }

    /// Undo a soft delete. Returns `false` if the dataset was not deleted.
    pub async fn restore(&self, id: Uuid) -> IngestionResult<bool> {
        self.require_exists(id).await?;
        let restored = self
            .short(IngestionStage::Completed, self.catalog.restore(id))
            .await?;
        if restored {
            info!(dataset_id = %id, "dataset restored");
        }
        Ok(restored)
    }

    async fn require_exists(&self, id: Uuid) -> IngestionResult<()> {
        self.short(IngestionStage::Completed, self.catalog.get(id))
            .await?
            .map(|_| ())
            .ok_or(IngestionError::DatasetNotFound(id))
    }

    async fn live_record(&self, id: Uuid) -> IngestionResult<DatasetRecord> {
        self.short(IngestionStage::Completed, self.catalog.get(id))
            .await?
            .filter(|r| !r.metadata.is_deleted())
            .ok_or(IngestionError::DatasetNotFound(id))
    }

    /// Run a store call under the short timeout.
    async fn short<T, E, F>(&self, stage: IngestionStage, fut: F) -> IngestionResult<T>
    where
        F: Future<Output = Result<T, E>>,
        IngestionError: From<E>,
    {
        let after = self.config.timeouts.short();
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result.map_err(IngestionError::from),
            Err(_) => Err(IngestionError::Timeout {
                stage: stage.as_str(),
                after,
            }),
        }
    }
}

enum Processed {
    Stored(DatasetRecord),
    Duplicate(DatasetMetadata),
}

/// Run `fut` under a timeout, giving up early if `cancel` fires.
async fn guarded<T, F>(
    stage: IngestionStage,
    after: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> IngestionResult<T>
where
    F: Future<Output = IngestionResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestionError::Cancelled),
        result = tokio::time::timeout(after, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(IngestionError::Timeout { stage: stage.as_str(), after }),
        },
    }
}

fn transition(stage: IngestionStage) {
    debug!(stage = stage.as_str(), "ingestion stage");
}

fn report_failure(options: &IngestOptions, ctx: &IngestionContext, err: &IngestionError) {
    if let Some(obs) = options.observer.as_ref() {
        let severity = err.severity();
        obs.on_failure(ctx, severity, err);
        if severity >= options.alert_at_or_above {
            obs.on_alert(ctx, severity, err);
        }
    }
}

/// Key of an upload's original bytes in the blob store.
fn blob_path(id: Uuid, file_name: &str) -> String {
    format!("datasets/{id}/{file_name}")
}

fn base_metadata(id: Uuid, upload: &RawUpload, status: ProcessingStatus) -> DatasetMetadata {
    DatasetMetadata {
        id,
        name: display_name(&upload.file_name),
        original_file_name: upload.file_name.clone(),
        content_type: upload.content_type.clone(),
        format: None,
        byte_size: upload.bytes.len() as u64,
        row_count: 0,
        column_count: 0,
        content_hash: None,
        status,
        storage_tier: None,
        blob_path: None,
        preview_rows: Vec::new(),
        row_limit_applied: false,
        processing_error: None,
        created_at: Utc::now(),
        deleted_at: None,
    }
}
