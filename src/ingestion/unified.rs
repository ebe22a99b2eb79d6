//! Unified parse entrypoint.
//!
//! Most callers should use [`parse_upload`], which selects a [`FormatParser`] and turns the
//! upload bytes into a [`ParsedTable`].
//!
//! - If [`ParseOptions::format`] is `None`, the format is inferred from the file extension and,
//!   failing that, from the declared content type.
//! - Parsers check the cancellation token every [`ParseOptions::batch_size`] rows.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ParseError, ParseResult};
use crate::types::{FileFormat, ParsedTable};

use super::csv::DelimitedParser;
use super::json::StructuredRecordParser;
use super::text::PlainTextParser;
use super::xml::MarkupParser;

/// Options controlling parser behavior.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// If `None`, infer the format from the file name or content type.
    #[serde(default)]
    pub format: Option<FileFormat>,
    /// Field delimiter for delimited text. Must be ASCII.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Whether the first delimited record is a header row.
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    /// Maximum number of data rows kept; further rows are dropped and reported as truncation.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Number of leading records scanned to infer a structured-record schema.
    #[serde(default = "default_schema_scan_limit")]
    pub schema_scan_limit: usize,
    /// Width of the spreadsheet block read in one call.
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,
    /// Rows processed between cancellation checks.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_delimiter() -> char {
    ','
}

fn default_has_header() -> bool {
    true
}

fn default_max_rows() -> usize {
    1_000_000
}

fn default_schema_scan_limit() -> usize {
    100
}

fn default_max_columns() -> usize {
    16_384 // widest sheet Excel allows
}

fn default_batch_size() -> usize {
    1_024
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            format: None,
            delimiter: default_delimiter(),
            has_header: default_has_header(),
            max_rows: default_max_rows(),
            schema_scan_limit: default_schema_scan_limit(),
            max_columns: default_max_columns(),
            batch_size: default_batch_size(),
        }
    }
}

impl ParseOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !self.delimiter.is_ascii() {
            return Err(format!(
                "parser.delimiter must be an ASCII character, got {:?}",
                self.delimiter
            ));
        }
        if self.max_rows == 0 {
            return Err("parser.max_rows must be > 0".to_string());
        }
        if self.schema_scan_limit == 0 {
            return Err("parser.schema_scan_limit must be > 0".to_string());
        }
        if self.max_columns == 0 {
            return Err("parser.max_columns must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("parser.batch_size must be > 0".to_string());
        }
        Ok(())
    }

    pub(crate) fn delimiter_byte(&self) -> u8 {
        if self.delimiter.is_ascii() {
            self.delimiter as u8
        } else {
            b','
        }
    }
}

/// A parsing strategy for one [`FileFormat`].
///
/// Implementations are stateless and must leave every row aligned to the returned schema.
pub trait FormatParser: Send + Sync {
    fn format(&self) -> FileFormat;

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable>;
}

/// Parser for spreadsheets; fails with [`ParseError::Unsupported`] without the `excel` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetParser;

impl FormatParser for SpreadsheetParser {
    fn format(&self) -> FileFormat {
        FileFormat::Spreadsheet
    }

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable> {
        #[cfg(feature = "excel")]
        {
            super::excel::parse_spreadsheet(bytes, options, cancel)
        }

        #[cfg(not(feature = "excel"))]
        {
            let _ = (bytes, options, cancel);
            Err(ParseError::Unsupported {
                format: FileFormat::Spreadsheet,
            })
        }
    }
}

static DELIMITED: DelimitedParser = DelimitedParser;
static STRUCTURED: StructuredRecordParser = StructuredRecordParser;
static SPREADSHEET: SpreadsheetParser = SpreadsheetParser;
static MARKUP: MarkupParser = MarkupParser;
static PLAIN_TEXT: PlainTextParser = PlainTextParser;

/// The parser registered for `format`.
pub fn parser_for(format: FileFormat) -> &'static dyn FormatParser {
    match format {
        FileFormat::Delimited => &DELIMITED,
        FileFormat::StructuredRecord => &STRUCTURED,
        FileFormat::Spreadsheet => &SPREADSHEET,
        FileFormat::Markup => &MARKUP,
        FileFormat::PlainText => &PLAIN_TEXT,
    }
}

/// Pick the format for an upload: explicit override, then extension, then content type.
pub fn resolve_format(
    file_name: &str,
    content_type: &str,
    options: &ParseOptions,
) -> ParseResult<FileFormat> {
    if let Some(format) = options.format {
        return Ok(format);
    }
    FileFormat::extension_of(file_name)
        .and_then(FileFormat::from_extension)
        .or_else(|| FileFormat::from_content_type(content_type))
        .ok_or_else(|| {
            ParseError::malformed(format!(
                "cannot infer format for '{file_name}' (content type '{content_type}')"
            ))
        })
}

/// Parse an upload's bytes into canonical rows.
///
/// Fails with [`ParseError::NoColumns`] when the parser found no columns: an empty schema is
/// never a successful parse.
///
/// # Examples
///
/// ```
/// use tabular_ingest::ingestion::{parse_upload, ParseOptions};
/// use tokio_util::sync::CancellationToken;
///
/// let input = b"id,name,value\n1,Alice,10\n2,Bob,20\n3,Carol,30\n";
/// let (format, table) = parse_upload(
///     input,
///     "people.csv",
///     "text/csv",
///     &ParseOptions::default(),
///     &CancellationToken::new(),
/// )?;
///
/// assert_eq!(format.to_string(), "delimited text");
/// assert_eq!(table.schema.columns, vec!["id", "name", "value"]);
/// assert_eq!(table.rows[1].get("name"), Some("Bob"));
/// # Ok::<(), tabular_ingest::ParseError>(())
/// ```
pub fn parse_upload(
    bytes: &[u8],
    file_name: &str,
    content_type: &str,
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<(FileFormat, ParsedTable)> {
    let format = resolve_format(file_name, content_type, options)?;
    let table = parser_for(format).parse(bytes, options, cancel)?;
    if table.schema.is_empty() {
        return Err(ParseError::NoColumns { format });
    }
    debug_assert!(
        table.rows.iter().all(|r| r.len() == table.schema.len()),
        "parser produced rows not aligned to its schema"
    );
    Ok((format, table))
}
