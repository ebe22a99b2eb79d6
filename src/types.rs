//! Core data model types for ingestion.
//!
//! Every supported format is parsed into the same shape: a [`CanonicalSchema`] (ordered column
//! names) and a sequence of [`CanonicalRow`]s whose values are all strings. Typed interpretation
//! of the values is left to downstream consumers.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileFormat {
    /// Delimited text (`.csv`).
    Delimited,
    /// JSON records (`.json`).
    StructuredRecord,
    /// Workbook (`.xlsx`, `.xls`).
    Spreadsheet,
    /// XML (`.xml`).
    Markup,
    /// One row per line (`.txt`).
    PlainText,
}

impl FileFormat {
    /// Map a file extension (case-insensitive, without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Delimited),
            "json" => Some(Self::StructuredRecord),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "xml" => Some(Self::Markup),
            "txt" => Some(Self::PlainText),
            _ => None,
        }
    }

    /// Map a declared MIME type to a format. Parameters such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/csv" | "application/csv" => Some(Self::Delimited),
            "application/json" => Some(Self::StructuredRecord),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(Self::Spreadsheet),
            "application/xml" | "text/xml" => Some(Self::Markup),
            "text/plain" => Some(Self::PlainText),
            _ => None,
        }
    }

    /// Extension of `file_name` (text after the last dot), if any.
    pub fn extension_of(file_name: &str) -> Option<&str> {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delimited => "delimited text",
            Self::StructuredRecord => "structured-record",
            Self::Spreadsheet => "spreadsheet",
            Self::Markup => "markup",
            Self::PlainText => "plain text",
        };
        f.write_str(name)
    }
}

/// Ordered list of column names produced once per dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanonicalSchema {
    /// Column names in order.
    pub columns: Vec<String>,
}

impl CanonicalSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

/// One parsed record: column name to string value, in schema order.
///
/// Rows built with [`CanonicalRow::from_values`] carry every schema column; missing cells are
/// empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalRow {
    cells: Vec<(String, String)>,
}

impl CanonicalRow {
    /// Build a row aligned to `schema`. Missing trailing values become `""`, surplus values are
    /// dropped.
    pub fn from_values<I, S>(schema: &CanonicalSchema, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = values.into_iter();
        let cells = schema
            .columns
            .iter()
            .map(|col| {
                let value = values.next().map(Into::into).unwrap_or_default();
                (col.clone(), value)
            })
            .collect();
        Self { cells }
    }

    /// Value of `column`, if the row has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for CanonicalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CanonicalRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = CanonicalRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to string value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut cells = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, value)) = access.next_entry::<String, String>()? {
                    cells.push((column, value));
                }
                Ok(CanonicalRow { cells })
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Output of a format parser.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedTable {
    pub schema: CanonicalSchema,
    pub rows: Vec<CanonicalRow>,
    /// `true` when rows past the configured maximum were dropped.
    pub truncated: bool,
    /// Record fields that were not part of the inferred schema and were dropped.
    pub dropped_fields: usize,
}

impl ParsedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.schema.len()
    }
}

/// Where a dataset's full row content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageTier {
    /// Rows are kept alongside the metadata.
    Inline,
    /// Rows are written to the row store; only a preview is kept with the metadata.
    RowStore,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::RowStore => f.write_str("row-store"),
        }
    }
}

/// Terminal processing state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

/// A single upload as handed over by the caller. Not retained after ingestion.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
    /// Size claimed by the caller (e.g. from a `Content-Length` header).
    pub declared_size: u64,
}

impl RawUpload {
    /// Create an upload whose declared size is the actual byte length.
    pub fn new(
        bytes: impl Into<Bytes>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            declared_size: bytes.len() as u64,
            bytes,
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }

    /// Read an upload from an async byte stream.
    ///
    /// At most `max_bytes + 1` bytes are read, so an oversized stream is still rejected by the
    /// validation gate without being buffered in full.
    pub async fn from_reader<R>(
        reader: R,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        max_bytes: u64,
    ) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader
            .take(max_bytes.saturating_add(1))
            .read_to_end(&mut buf)
            .await?;
        Ok(Self::new(buf, file_name, content_type))
    }
}

/// Persisted description of an ingested dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: Uuid,
    /// Display name (the file name without its extension).
    pub name: String,
    pub original_file_name: String,
    pub content_type: String,
    pub format: Option<FileFormat>,
    pub byte_size: u64,
    pub row_count: u64,
    pub column_count: u64,
    pub content_hash: Option<String>,
    pub status: ProcessingStatus,
    /// `None` when ingestion failed before a tier was chosen.
    pub storage_tier: Option<StorageTier>,
    /// Key of the original upload in the blob store.
    pub blob_path: Option<String>,
    pub preview_rows: Vec<CanonicalRow>,
    /// Set when the parser dropped rows beyond its configured maximum.
    pub row_limit_applied: bool,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DatasetMetadata {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}

/// Display name derived from a file name: everything before the last dot.
pub(crate) fn display_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}
