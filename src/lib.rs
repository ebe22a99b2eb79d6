//! `tabular-ingest` turns uploaded tabular files into canonical string rows and decides where
//! those rows are kept.
//!
//! The primary entrypoint is [`pipeline::Ingestor::ingest`], which validates an upload, hashes
//! and parses it, picks a storage tier, and persists it through pluggable stores.
//!
//! ## What you can ingest
//!
//! **File formats (selected by extension, then by content type):**
//!
//! - **Delimited text**: `.csv` (configurable delimiter, optional header row)
//! - **Structured records**: `.json` (array of objects, single object, or one object per line)
//! - **Spreadsheets** (requires the Cargo feature `excel`): `.xlsx`, `.xls` (first worksheet)
//! - **Markup**: `.xml` (repeating child elements of the root are records)
//! - **Plain text**: `.txt` (one row per line, column `Line`)
//!
//! Every format produces a [`types::CanonicalSchema`] and [`types::CanonicalRow`]s whose values
//! are strings; a missing cell is `""`.
//!
//! ## Quick example: parse bytes
//!
//! ```
//! use tabular_ingest::ingestion::{parse_upload, ParseOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let (_, table) = parse_upload(
//!     b"[{\"a\":1},{\"a\":2,\"b\":3}]",
//!     "records.json",
//!     "application/json",
//!     &ParseOptions::default(),
//!     &CancellationToken::new(),
//! )?;
//! assert_eq!(table.schema.columns, vec!["a", "b"]);
//! assert_eq!(table.rows[0].get("b"), Some(""));
//! # Ok::<(), tabular_ingest::ParseError>(())
//! ```
//!
//! ## Quick example: ingest an upload
//!
//! ```
//! use tabular_ingest::config::IngestConfig;
//! use tabular_ingest::pipeline::{IngestOptions, Ingestor};
//! use tabular_ingest::types::{ProcessingStatus, RawUpload, StorageTier};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tabular_ingest::IngestionError> {
//! let ingestor = Ingestor::in_memory(IngestConfig::default());
//! let upload = RawUpload::new(
//!     &b"id,name,value\n1,Alice,10\n2,Bob,20\n3,Carol,30\n"[..],
//!     "people.csv",
//!     "text/csv",
//! );
//!
//! let meta = ingestor
//!     .ingest(upload, &IngestOptions::default(), &CancellationToken::new())
//!     .await?;
//! assert_eq!(meta.status, ProcessingStatus::Completed);
//! assert_eq!(meta.storage_tier, Some(StorageTier::Inline));
//! assert_eq!(meta.row_count, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Stores
//!
//! [`store::BlobStore`] and [`store::RowStore`] are the persistence seams. The crate ships
//! in-memory implementations: [`store::BoundedArtifactStore`] (bounded, evicting, integrity
//! checked), [`store::FaultInjectingStore`] (configurable failures for resilience tests), and
//! [`store::MemoryRowStore`].
//!
//! ## Configuration and logging
//!
//! [`config::IngestConfig::load`] layers defaults, an optional TOML file, and `TABULAR_*`
//! environment variables. [`logging::init_logging`] installs a `tracing` subscriber.

pub mod catalog;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ingestion;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod tiering;
pub mod types;
pub mod validation;

pub use error::{
    ErrorClass, IngestionError, IngestionResult, ParseError, ParseResult, StoreError, StoreResult,
    ValidationError, ValidationFailure,
};
pub use pipeline::{IngestOptions, Ingestor};
