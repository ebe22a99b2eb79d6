use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::ingestion::IngestionSeverity;
use crate::types::FileFormat;

/// Convenience result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Convenience result type for blob/row store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error returned by the format parsers.
///
/// Parse errors are expected, user-facing outcomes: the upload is recorded as a failed dataset
/// carrying this error's message.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Delimited-text reader error (invalid UTF-8, I/O on the underlying reader).
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    /// Workbook could not be opened or the worksheet could not be read.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Structured-record input is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Markup input is not well-formed XML.
    #[error("xml error: {0}")]
    Markup(#[from] quick_xml::Error),

    /// Input is structurally wrong for its format (unterminated quote, non-object record, ...).
    #[error("malformed input: {message}")]
    Malformed { message: String },

    /// Parsing succeeded but no columns were detected.
    #[error("no columns detected in {format} input")]
    NoColumns { format: FileFormat },

    /// The format is known but support for it was not compiled in.
    #[error("{format} parsing is not enabled in this build")]
    Unsupported { format: FileFormat },

    /// The cancellation signal fired between row batches.
    #[error("parsing cancelled")]
    Cancelled,
}

impl ParseError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Error returned by blob/row store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The item exceeds the configured per-item limit, or the store reports itself full.
    #[error("capacity exceeded for '{key}': {size} bytes (limit {limit})")]
    Capacity { key: String, size: u64, limit: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    /// The stored payload could not be read back intact.
    #[error("corrupted payload for '{key}': {reason}")]
    Corruption { key: String, reason: String },

    /// The operation (including waiting for a concurrency permit) exceeded its budget.
    #[error("store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The store has been shut down.
    #[error("store is closed")]
    Closed,

    /// Any other backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Which validation rule rejected an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Empty byte stream or empty file name.
    Empty,
    /// Extension is missing or not on the allow-list.
    ExtensionNotAllowed,
    /// Extension is on the deny-list.
    ExtensionDenied,
    /// Declared or actual size exceeds the configured maximum.
    TooLarge,
    /// File name contains path separators, traversal sequences, or control characters.
    UnsafeFileName,
}

/// Rejection raised by the validation gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {reason}")]
pub struct ValidationError {
    pub kind: ValidationFailure,
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(kind: ValidationFailure, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Coarse classification of an [`IngestionError`], used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller; never retried.
    Client,
    /// File content could not be parsed; never retried.
    Content,
    /// Store-level failure.
    Infrastructure,
    /// A stage exceeded its time budget.
    Timeout,
    /// Anything else.
    Internal,
}

/// Error type returned by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A pipeline stage exceeded its time budget.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The caller cancelled the ingestion.
    #[error("ingestion cancelled")]
    Cancelled,

    /// Caller-supplied parse options failed validation.
    #[error("invalid parse options: {0}")]
    InvalidOptions(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::InvalidOptions(_) | Self::DatasetNotFound(_) => {
                ErrorClass::Client
            }
            Self::Parse(ParseError::Cancelled) | Self::Cancelled => ErrorClass::Client,
            Self::Parse(_) => ErrorClass::Content,
            Self::Store(StoreError::Timeout { .. }) | Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Store(_) => ErrorClass::Infrastructure,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Severity reported to [`crate::ingestion::IngestionObserver`]s.
    pub fn severity(&self) -> IngestionSeverity {
        match self.class() {
            ErrorClass::Client => IngestionSeverity::Warning,
            ErrorClass::Content => IngestionSeverity::Error,
            ErrorClass::Infrastructure | ErrorClass::Timeout | ErrorClass::Internal => {
                IngestionSeverity::Critical
            }
        }
    }
}
