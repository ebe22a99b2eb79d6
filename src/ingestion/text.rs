//! Plain-text parser: one row per line in a single `Line` column.
//!
//! Invalid UTF-8 sequences are replaced rather than rejected. `\r\n` and `\n` both end a line;
//! a trailing newline does not produce an extra empty row.

use tokio_util::sync::CancellationToken;

use crate::error::ParseResult;
use crate::types::{CanonicalRow, CanonicalSchema, FileFormat, ParsedTable};

use super::unified::{FormatParser, ParseOptions};
use super::{BatchCheck, strip_utf8_bom};

/// Name of the only column produced for plain text.
pub const LINE_COLUMN: &str = "Line";

/// [`FormatParser`] for `.txt` uploads.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl FormatParser for PlainTextParser {
    fn format(&self) -> FileFormat {
        FileFormat::PlainText
    }

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable> {
        parse_plain_text(bytes, options, cancel)
    }
}

pub fn parse_plain_text(
    bytes: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let mut batch = BatchCheck::new(cancel, options.batch_size);
    batch.check()?;

    let text = String::from_utf8_lossy(strip_utf8_bom(bytes));
    let schema = CanonicalSchema::new(vec![LINE_COLUMN.to_string()]);

    let mut rows = Vec::new();
    let mut truncated = false;
    for line in text.lines() {
        if rows.len() >= options.max_rows {
            truncated = true;
            break;
        }
        rows.push(CanonicalRow::from_values(&schema, [line]));
        batch.tick()?;
    }
    batch.check()?;

    Ok(ParsedTable {
        schema,
        rows,
        truncated,
        dropped_fields: 0,
    })
}
