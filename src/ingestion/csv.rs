//! Delimited-text parser.
//!
//! Rules:
//!
//! - The delimiter is configurable (default `,`); quoting follows RFC 4180 with `"`.
//! - With a header row, the first record becomes the schema. Without one, columns are
//!   synthesized as `Column1..ColumnN` from the width of the first record.
//! - Records are streamed one at a time. Short records are padded with `""`, surplus fields
//!   are dropped.
//! - After [`ParseOptions::max_rows`] data rows, remaining records are dropped and the table is
//!   marked truncated.

use std::io::Read;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::types::{CanonicalRow, CanonicalSchema, FileFormat, ParsedTable};

use super::unified::{FormatParser, ParseOptions};
use super::{BatchCheck, normalize_headers, strip_utf8_bom, synthetic_column};

const QUOTE: u8 = b'"';

/// [`FormatParser`] for `.csv` uploads.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedParser;

impl FormatParser for DelimitedParser {
    fn format(&self) -> FileFormat {
        FileFormat::Delimited
    }

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable> {
        parse_delimited(bytes, options, cancel)
    }
}

/// Parse delimited text held in memory.
pub fn parse_delimited(
    bytes: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let bytes = strip_utf8_bom(bytes);
    let delimiter = options.delimiter_byte();
    check_quotes_terminated(bytes, delimiter)?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    parse_delimited_reader(&mut rdr, options, cancel)
}

/// Parse records from an existing CSV reader.
///
/// The reader must be built with `has_headers(false)`; header handling is governed by
/// [`ParseOptions::has_header`].
pub fn parse_delimited_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let mut batch = BatchCheck::new(cancel, options.batch_size);
    batch.check()?;

    let mut record = csv::StringRecord::new();
    if !rdr.read_record(&mut record)? {
        return Err(ParseError::NoColumns {
            format: FileFormat::Delimited,
        });
    }

    let schema = if options.has_header {
        CanonicalSchema::new(normalize_headers(record.iter()))
    } else {
        CanonicalSchema::new((0..record.len()).map(synthetic_column).collect())
    };

    let mut rows: Vec<CanonicalRow> = Vec::new();
    let mut truncated = false;
    if !options.has_header {
        rows.push(CanonicalRow::from_values(&schema, record.iter()));
        batch.tick()?;
    }

    while rdr.read_record(&mut record)? {
        if rows.len() >= options.max_rows {
            truncated = true;
            break;
        }
        rows.push(CanonicalRow::from_values(&schema, record.iter()));
        batch.tick()?;
    }
    batch.check()?;

    if truncated {
        debug!(max_rows = options.max_rows, "delimited input truncated at row limit");
    }

    Ok(ParsedTable {
        schema,
        rows,
        truncated,
        dropped_fields: 0,
    })
}

/// Reject input that ends inside a quoted field.
///
/// A quote opens a quoted field only at the start of a field; inside one, `""` is an escaped
/// quote and a single `"` closes it. Quotes in the middle of an unquoted field are literal.
fn check_quotes_terminated(bytes: &[u8], delimiter: u8) -> ParseResult<()> {
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut line = 1usize;
    let mut opened_at = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' {
            line += 1;
        }
        if in_quotes {
            if b == QUOTE {
                if bytes.get(i + 1) == Some(&QUOTE) {
                    i += 1;
                } else {
                    in_quotes = false;
                }
            }
        } else if b == QUOTE && at_field_start {
            in_quotes = true;
            opened_at = line;
            at_field_start = false;
        } else {
            at_field_start = b == delimiter || b == b'\n' || b == b'\r';
        }
        i += 1;
    }

    if in_quotes {
        return Err(ParseError::malformed(format!(
            "unterminated quoted field starting on line {opened_at}"
        )));
    }
    Ok(())
}
