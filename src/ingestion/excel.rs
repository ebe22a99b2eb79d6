#![cfg(feature = "excel")]

//! Spreadsheet parser (`.xlsx`, `.xls`).
//!
//! Behavior:
//! - Reads the first worksheet only
//! - Reads one bounded rectangular block (header + `max_rows` data rows, `max_columns` wide)
//!   from the sheet's used range in a single call, then walks it in memory
//! - The first row of the block is the header; blank header cells become `ColumnN`
//! - Empty cells map to `""`; rows with no non-empty cells are skipped

use std::io::Cursor;

use calamine::{Data, DataType, Range, Reader, open_workbook_auto_from_rs};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::types::{CanonicalRow, CanonicalSchema, FileFormat, ParsedTable};

use super::unified::ParseOptions;
use super::{BatchCheck, normalize_headers};

/// Parse the first worksheet of a workbook held in memory.
pub fn parse_spreadsheet(
    bytes: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let mut batch = BatchCheck::new(cancel, options.batch_size);
    batch.check()?;

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ParseError::malformed("workbook has no worksheets"))??;

    let (block, truncated) = bounded_block(&range, options)?;
    let mut sheet_rows = block.rows();
    let header = sheet_rows.next().ok_or(ParseError::NoColumns {
        format: FileFormat::Spreadsheet,
    })?;
    let schema = CanonicalSchema::new(normalize_headers(header.iter().map(cell_to_string)));

    let mut rows = Vec::new();
    for row in sheet_rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        rows.push(CanonicalRow::from_values(&schema, row.iter().map(cell_to_string)));
        batch.tick()?;
    }
    batch.check()?;

    if truncated {
        debug!(max_rows = options.max_rows, "worksheet truncated at row limit");
    }

    Ok(ParsedTable {
        schema,
        rows,
        truncated,
        dropped_fields: 0,
    })
}

/// Cut the header row plus at most `max_rows` data rows and `max_columns` columns out of the
/// used range. Returns the block and whether rows were cut off.
fn bounded_block(range: &Range<Data>, options: &ParseOptions) -> ParseResult<(Range<Data>, bool)> {
    let (Some(start), Some(end)) = (range.start(), range.end()) else {
        return Err(ParseError::NoColumns {
            format: FileFormat::Spreadsheet,
        });
    };

    let max_rows = u32::try_from(options.max_rows).unwrap_or(u32::MAX);
    let max_cols = u32::try_from(options.max_columns).unwrap_or(u32::MAX);
    let last_row = end.0.min(start.0.saturating_add(max_rows));
    let last_col = end.1.min(start.1.saturating_add(max_cols.saturating_sub(1)));

    Ok((range.range(start, (last_row, last_col)), last_row < end.0))
}

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => match c.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.format("%Y-%m-%d").to_string(),
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => c.to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}
